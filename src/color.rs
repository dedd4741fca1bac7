use crate::frame::WavelengthAxis;

/// Bottom of the mapped domain (nm); shorter wavelengths clamp here
pub const MIN_WAVELENGTH_NM: f64 = 200.0;

/// Top of the mapped domain (nm); longer wavelengths clamp here
pub const MAX_WAVELENGTH_NM: f64 = 1100.0;

/// Map a wavelength to a display color, each channel in [0, 1].
///
/// Visible light gets its real hue; UV ramps violet → blue and IR ramps
/// red → white so the detector strip stays readable outside 380–780 nm.
/// Bands are checked in ascending order with `<`, so a boundary value
/// belongs to the band above it. The formulas agree at every boundary.
pub fn wavelength_to_rgb(nm: f64) -> [f32; 3] {
    let l = if nm.is_nan() {
        MIN_WAVELENGTH_NM
    } else {
        nm.clamp(MIN_WAVELENGTH_NM, MAX_WAVELENGTH_NM)
    };

    let (r, g, b) = if l < 380.0 {
        // UV: violet → blue
        let t = (l - 200.0) / 180.0;
        (0.5 * (1.0 - t), 0.0, 1.0)
    } else if l < 440.0 {
        (0.0, 0.0, 1.0)
    } else if l < 490.0 {
        // blue → cyan
        let t = (l - 440.0) / 50.0;
        (0.0, t, 1.0)
    } else if l < 510.0 {
        // cyan → green
        let t = (l - 490.0) / 20.0;
        (0.0, 1.0, 1.0 - t)
    } else if l < 580.0 {
        // green → yellow
        let t = (l - 510.0) / 70.0;
        (t, 1.0, 0.0)
    } else if l < 645.0 {
        // yellow → red
        let t = (l - 580.0) / 65.0;
        (1.0, 1.0 - t, 0.0)
    } else if l < 780.0 {
        (1.0, 0.0, 0.0)
    } else {
        // IR: red → white
        let t = (l - 780.0) / 320.0;
        (1.0, t, t)
    };

    [r as f32, g as f32, b as f32]
}

/// Per-channel base colors, computed once from the wavelength axis
#[derive(Debug, Clone, PartialEq)]
pub struct ColorTable {
    colors: Vec<[f32; 3]>,
}

impl ColorTable {
    pub fn from_axis(axis: &WavelengthAxis) -> Self {
        Self {
            colors: axis.as_slice().iter().map(|&nm| wavelength_to_rgb(nm)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn as_slice(&self) -> &[[f32; 3]] {
        &self.colors
    }
}

/// Simple RGB color
///
/// We define our own so the render and export paths don't depend on egui
/// (converted to egui::Color32 / image::Rgb at the edges).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Color32 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color32 {
    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const BLACK: Self = Self::from_rgb(0, 0, 0);

    /// Convert a unit-range color, clamping to [0, 1] first.
    /// Scaling truncates, like a float → uint8 cast.
    pub fn from_unit(rgb: [f32; 3]) -> Self {
        let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0) as u8;
        Self {
            r: to_u8(rgb[0]),
            g: to_u8(rgb[1]),
            b: to_u8(rgb[2]),
        }
    }

    pub fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

// === Tests ===
#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: [f32; 3], b: [f32; 3]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-4)
    }

    #[test]
    fn test_band_anchors() {
        assert!(close(wavelength_to_rgb(200.0), [0.5, 0.0, 1.0]));
        assert!(close(wavelength_to_rgb(290.0), [0.25, 0.0, 1.0]));
        assert!(close(wavelength_to_rgb(400.0), [0.0, 0.0, 1.0]));
        assert!(close(wavelength_to_rgb(465.0), [0.0, 0.5, 1.0]));
        assert!(close(wavelength_to_rgb(500.0), [0.0, 1.0, 0.5]));
        assert!(close(wavelength_to_rgb(545.0), [0.5, 1.0, 0.0]));
        assert!(close(wavelength_to_rgb(612.5), [1.0, 0.5, 0.0]));
        assert!(close(wavelength_to_rgb(700.0), [1.0, 0.0, 0.0]));
        assert!(close(wavelength_to_rgb(940.0), [1.0, 0.5, 0.5]));
        assert!(close(wavelength_to_rgb(1100.0), [1.0, 1.0, 1.0]));
    }

    #[test]
    fn test_out_of_domain_clamps() {
        assert_eq!(wavelength_to_rgb(50.0), wavelength_to_rgb(200.0));
        assert_eq!(wavelength_to_rgb(2000.0), wavelength_to_rgb(1100.0));
        assert_eq!(wavelength_to_rgb(f64::NAN), wavelength_to_rgb(200.0));
    }

    #[test]
    fn test_range_over_domain() {
        let mut nm = MIN_WAVELENGTH_NM;
        while nm <= MAX_WAVELENGTH_NM {
            let rgb = wavelength_to_rgb(nm);
            for c in rgb {
                assert!((0.0..=1.0).contains(&c), "{nm} nm gave {rgb:?}");
            }
            nm += 0.25;
        }
    }

    #[test]
    fn test_continuous_at_boundaries() {
        // Approaching each boundary from below must land on the value the
        // next band starts with
        for boundary in [380.0, 440.0, 490.0, 510.0, 580.0, 645.0, 780.0] {
            let below = wavelength_to_rgb(boundary - 1e-9);
            let at = wavelength_to_rgb(boundary);
            assert!(close(below, at), "discontinuity at {boundary}: {below:?} vs {at:?}");
        }
    }

    #[test]
    fn test_color_table_follows_axis() {
        let axis = WavelengthAxis::new(vec![300.0, 550.0, 900.0]).unwrap();
        let table = ColorTable::from_axis(&axis);

        assert_eq!(table.len(), 3);
        assert_eq!(table.as_slice()[1], wavelength_to_rgb(550.0));
    }

    #[test]
    fn test_from_unit_truncates_and_clamps() {
        assert_eq!(Color32::from_unit([1.0, 0.5, 0.0]), Color32::from_rgb(255, 127, 0));
        assert_eq!(Color32::from_unit([2.0, -1.0, 0.999]), Color32::from_rgb(255, 0, 254));
    }
}
