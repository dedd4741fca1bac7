use eframe::egui::{self, Color32};

use crate::render::StripImage;

// === Plot ===
pub const CURVE_COLOR: Color32 = Color32::from_rgb(80, 170, 255);
pub const CURVE_WIDTH: f32 = 1.5;
pub const CROSSHAIR_COLOR: Color32 = Color32::from_rgb(255, 210, 0);

// === Status ===
pub const PAUSED_COLOR: Color32 = Color32::from_rgb(255, 170, 0);
pub const FAULT_COLOR: Color32 = Color32::from_rgb(230, 60, 60);

// === Layout ===
pub const STRIP_HEIGHT: f32 = 60.0;

/// Strip pixels as an egui image, ready to upload as a texture
pub fn strip_to_color_image(strip: &StripImage) -> egui::ColorImage {
    egui::ColorImage::from_rgb([strip.width, strip.height], &strip.to_rgb_bytes())
}

// === Tests ===
#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color32 as ChannelColor;

    #[test]
    fn test_strip_to_color_image() {
        let row = [ChannelColor::from_rgb(255, 0, 0), ChannelColor::from_rgb(0, 0, 255)];
        let strip = StripImage::from_row(&row, 4);
        let image = strip_to_color_image(&strip);

        assert_eq!(image.size, [2, 4]);
        assert_eq!(image.pixels.len(), 8);
        assert_eq!(image.pixels[3], Color32::from_rgb(0, 0, 255));
    }
}
