use crate::gpu::Screen;
use image::RgbaImage;
use std::path::Path;

/// Copies the presented screen into an image, flipping rows so the top of
/// the window is the first row of the image.
pub fn screen_to_image(screen: &Screen) -> RgbaImage {
    RgbaImage::from_fn(screen.width as u32, screen.height as u32, |x, y| {
        let row = screen.height - 1 - y as usize;
        image::Rgba(screen.pixels[row * screen.width + x as usize])
    })
}

pub fn write_png(path: impl AsRef<Path>, screen: &Screen) -> anyhow::Result<()> {
    let path = path.as_ref();
    screen_to_image(screen).save_with_format(path, image::ImageFormat::Png)?;
    tracing::debug!(path = %path.display(), "wrote image");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_flipped() {
        let screen = Screen {
            width: 2,
            height: 2,
            pixels: vec![[1, 0, 0, 255], [2, 0, 0, 255], [3, 0, 0, 255], [4, 0, 0, 255]],
        };
        let img = screen_to_image(&screen);
        assert_eq!(img.get_pixel(0, 0).0, [3, 0, 0, 255]);
        assert_eq!(img.get_pixel(1, 1).0, [2, 0, 0, 255]);
    }
}
