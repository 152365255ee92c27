use crate::BinResult;
use gifplayer::decoder::RGBA8;
use gifplayer::surface::DisplaySurface;
use std::path::Path;

/// Saves what's currently displayed. The surface is BGRA, PNG wants RGBA.
pub fn write_surface(path: &Path, surface: &DisplaySurface) -> BinResult<()> {
    let img = surface.image();
    let rgba: Vec<RGBA8> = img.pixels().map(|px| RGBA8::new(px.r, px.g, px.b, px.a)).collect();
    lodepng::encode32_file(path, &rgba, img.width(), img.height())?;
    Ok(())
}
