//! Binary masks
//!
//! Every mask entry is exactly 0 (ink) or 255 (background). Masks come from
//! a luminance cutoff or from a marker color membership rule.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ColorConfig, ColorRuleConfig};
use crate::vision::raster::{normalized_grayscale, Raster};

pub const INK: u8 = 0;
pub const BACKGROUND: u8 = 255;

/// Marker colors used on worksheet images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerColor {
    Red,
    Green,
    Blue,
    Purple,
    /// Dark pen/print ink, selected by luminance instead of hue
    Dark,
}

impl std::str::FromStr for MarkerColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "red" => Ok(MarkerColor::Red),
            "green" => Ok(MarkerColor::Green),
            "blue" => Ok(MarkerColor::Blue),
            "purple" => Ok(MarkerColor::Purple),
            "dark" | "black" => Ok(MarkerColor::Dark),
            other => Err(format!("unknown marker color '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    R = 0,
    G = 1,
    B = 2,
}

/// Color membership predicate: every primary channel is at least
/// `min_primary` and leads every non-primary channel by `min_delta`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorRule {
    primary: Vec<Channel>,
    min_primary: u8,
    min_delta: i16,
    min_alpha: u8,
}

impl ColorRule {
    /// Rule for a hued marker color; `None` for `Dark`
    pub fn for_color(color: MarkerColor, config: &ColorConfig) -> Option<Self> {
        let (primary, rule): (Vec<Channel>, &ColorRuleConfig) = match color {
            MarkerColor::Red => (vec![Channel::R], &config.red),
            MarkerColor::Green => (vec![Channel::G], &config.green),
            MarkerColor::Blue => (vec![Channel::B], &config.blue),
            MarkerColor::Purple => (vec![Channel::R, Channel::B], &config.purple),
            MarkerColor::Dark => return None,
        };
        Some(Self {
            primary,
            min_primary: rule.min_primary,
            min_delta: rule.min_delta,
            min_alpha: config.min_alpha,
        })
    }

    pub fn matches(&self, rgba: [u8; 4]) -> bool {
        if rgba[3] < self.min_alpha {
            return false;
        }
        self.primary.iter().all(|&p| {
            let value = rgba[p as usize];
            value >= self.min_primary
                && [Channel::R, Channel::G, Channel::B]
                    .iter()
                    .filter(|c| !self.primary.contains(*c))
                    .all(|&o| value as i16 - rgba[o as usize] as i16 >= self.min_delta)
        })
    }
}

/// Ink/background mask over a raster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl BinaryMask {
    /// All-background mask
    #[cfg(test)]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![BACKGROUND; width as usize * height as usize],
        }
    }

    /// Dark ink: contrast-normalized luminance strictly below `cutoff`
    pub fn from_threshold(raster: &Raster, cutoff: u8, min_alpha: u8) -> Self {
        let gray = normalized_grayscale(raster, min_alpha);
        let data = gray
            .into_iter()
            .map(|v| if v < cutoff { INK } else { BACKGROUND })
            .collect();
        let mask = Self {
            width: raster.width(),
            height: raster.height(),
            data,
        };
        debug!("Threshold mask (cutoff {}): {} ink pixels", cutoff, mask.ink_count());
        mask
    }

    /// Pixels satisfying a color rule
    pub fn from_color(raster: &Raster, rule: &ColorRule) -> Self {
        let data = raster
            .as_image()
            .pixels()
            .map(|p| if rule.matches(p.0) { INK } else { BACKGROUND })
            .collect();
        let mask = Self {
            width: raster.width(),
            height: raster.height(),
            data,
        };
        debug!("Color mask: {} ink pixels", mask.ink_count());
        mask
    }

    /// Mask for a marker color using the configured rules
    pub fn for_marker(raster: &Raster, color: MarkerColor, config: &ColorConfig) -> Self {
        match ColorRule::for_color(color, config) {
            Some(rule) => Self::from_color(raster, &rule),
            None => Self::from_threshold(raster, config.dark_cutoff, config.min_alpha),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether (x, y) is ink; coordinates outside the mask are background
    pub fn is_ink(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return false;
        }
        self.data[y as usize * self.width as usize + x as usize] == INK
    }

    #[cfg(test)]
    pub fn set_ink(&mut self, x: u32, y: u32) {
        if x < self.width && y < self.height {
            self.data[y as usize * self.width as usize + x as usize] = INK;
        }
    }

    /// Mark a rectangle as ink, clipped to the mask
    #[cfg(test)]
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        for py in y..(y + height).min(self.height) {
            for px in x..(x + width).min(self.width) {
                self.set_ink(px, py);
            }
        }
    }

    /// Mark a rectangle as background, clipped to the mask
    #[cfg(test)]
    pub fn clear_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        for py in y..(y + height).min(self.height) {
            for px in x..(x + width).min(self.width) {
                self.data[py as usize * self.width as usize + px as usize] = BACKGROUND;
            }
        }
    }

    pub fn ink_count(&self) -> usize {
        self.data.iter().filter(|&&v| v == INK).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.data.contains(&INK)
    }

    #[cfg(test)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Ink as black on white paper
    pub fn to_raster(&self) -> Raster {
        let mut raster = Raster::filled(self.width, self.height, [255, 255, 255, 255]);
        for (i, &value) in self.data.iter().enumerate() {
            if value == INK {
                let i = i as u32;
                raster.put(i % self.width, i / self.width, [0, 0, 0, 255]);
            }
        }
        raster
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: [u8; 4] = [255, 255, 255, 255];

    #[test]
    fn test_green_rule() {
        let config = ColorConfig::default();
        let rule = ColorRule::for_color(MarkerColor::Green, &config).unwrap();
        assert!(rule.matches([0, 128, 0, 255]));
        assert!(rule.matches([40, 200, 60, 255]));
        assert!(!rule.matches([0, 128, 0, 10]), "alpha gated");
        assert!(!rule.matches([120, 160, 0, 255]), "red too close");
        assert!(!rule.matches(WHITE));
    }

    #[test]
    fn test_purple_is_not_red_or_blue() {
        let config = ColorConfig::default();
        let purple = ColorRule::for_color(MarkerColor::Purple, &config).unwrap();
        let red = ColorRule::for_color(MarkerColor::Red, &config).unwrap();
        let blue = ColorRule::for_color(MarkerColor::Blue, &config).unwrap();

        assert!(purple.matches([128, 0, 128, 255]));
        assert!(!red.matches([128, 0, 128, 255]));
        assert!(!blue.matches([128, 0, 128, 255]));
        assert!(red.matches([230, 20, 20, 255]));
        assert!(!purple.matches([230, 20, 20, 255]));
    }

    #[test]
    fn test_marker_mask_values() {
        let mut raster = Raster::filled(4, 3, WHITE);
        raster.fill_rect(1, 1, 2, 1, [0, 160, 0, 255]);
        let mask = BinaryMask::for_marker(&raster, MarkerColor::Green, &ColorConfig::default());

        assert!(mask.as_bytes().iter().all(|&v| v == INK || v == BACKGROUND));
        assert_eq!(mask.ink_count(), 2);
        assert!(mask.is_ink(1, 1));
        assert!(!mask.is_ink(0, 1));
        assert!(!mask.is_ink(-1, 0));
        assert!(!mask.is_ink(4, 0));
    }

    #[test]
    fn test_dark_threshold_mask() {
        let mut raster = Raster::filled(3, 3, WHITE);
        raster.put(1, 1, [10, 10, 10, 255]);
        let mask = BinaryMask::for_marker(&raster, MarkerColor::Dark, &ColorConfig::default());
        assert_eq!(mask.ink_count(), 1);
        assert!(mask.is_ink(1, 1));
    }

    #[test]
    fn test_to_raster_draws_ink_black() {
        let mut mask = BinaryMask::new(10, 6);
        mask.fill_rect(4, 3, 2, 2);
        let raster = mask.to_raster();
        assert_eq!((raster.width(), raster.height()), (10, 6));
        assert_eq!(raster.pixel(5, 4), [0, 0, 0, 255]);
        assert_eq!(raster.pixel(3, 3), WHITE);
        assert_eq!(raster.pixel(9, 5), WHITE);
    }

    #[test]
    fn test_marker_color_parse() {
        assert_eq!("Purple".parse::<MarkerColor>().unwrap(), MarkerColor::Purple);
        assert_eq!("black".parse::<MarkerColor>().unwrap(), MarkerColor::Dark);
        assert!("teal".parse::<MarkerColor>().is_err());
    }
}
