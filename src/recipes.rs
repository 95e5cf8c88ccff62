/*!
 # Light recipes

 The immutable recipe catalog. A recipe is a named RGBW preset; its wire
 code is its position in [`RECIPE_KEYS`], which must match the order
 used by every paired client.
*/

use crate::color::Color;

/// Name of the reserved all-dark recipe
pub const OFF: &str = "off";

/// Pseudo-name for any applied colour that matches no catalog entry
pub const CUSTOM: &str = "custom";

/// Status byte used on the wire for [`CUSTOM`]
pub const CUSTOM_CODE: u8 = 0xFF;

/// Recipe catalog as `(name, colour)` in wire order
pub const RECIPES: &[(&str, Color)] = &[
    ("balanced", Color::new(255, 64, 128, 255)),
    ("warm", Color::new(255, 140, 20, 255)),
    ("cool", Color::new(180, 200, 255, 255)),
    ("daylight", Color::new(255, 230, 210, 255)),
    ("veg_growth", Color::new(50, 255, 70, 200)),
    ("bloom", Color::new(255, 100, 10, 150)),
    ("seedling", Color::new(100, 100, 200, 150)),
    ("succulent", Color::new(220, 180, 40, 200)),
    ("purple_glow", Color::new(180, 0, 255, 0)),
    ("sunrise", Color::new(255, 50, 20, 100)),
    ("sunset", Color::new(255, 30, 0, 50)),
    ("forest", Color::new(30, 200, 30, 120)),
    ("aquarium", Color::new(0, 200, 255, 50)),
    ("night_light", Color::new(50, 20, 0, 30)),
    ("inspection", Color::new(255, 255, 255, 255)),
    (OFF, Color::OFF),
];

/// Recipe names in wire order
pub const RECIPE_KEYS: [&str; 16] = [
    "balanced",
    "warm",
    "cool",
    "daylight",
    "veg_growth",
    "bloom",
    "seedling",
    "succulent",
    "purple_glow",
    "sunrise",
    "sunset",
    "forest",
    "aquarium",
    "night_light",
    "inspection",
    OFF,
];

/// Colour of a named recipe
pub fn color_of(name: &str) -> Option<Color> {
    RECIPES
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, color)| *color)
}

/// True when `name` is a catalog entry
pub fn exists(name: &str) -> bool {
    color_of(name).is_some()
}

/// Recipe name at wire index `index`
pub fn name_at(index: u8) -> Option<&'static str> {
    RECIPE_KEYS.get(index as usize).copied()
}

/// Wire index of a recipe name
pub fn index_of(name: &str) -> Option<u8> {
    RECIPE_KEYS
        .iter()
        .position(|key| *key == name)
        .map(|index| index as u8)
}

/// Recipe name for a schedule recipe code; unknown codes map to [`OFF`]
pub fn name_for_code(code: u8) -> &'static str {
    name_at(code).unwrap_or(OFF)
}

/// Reverse lookup of a colour; [`CUSTOM`] when nothing matches
pub fn name_for_color(color: Color) -> &'static str {
    RECIPES
        .iter()
        .find(|(_, candidate)| *candidate == color)
        .map(|(key, _)| *key)
        .unwrap_or(CUSTOM)
}

/// Status byte for a recipe name, [`CUSTOM_CODE`] when not in the catalog
pub fn status_code(name: &str) -> u8 {
    index_of(name).unwrap_or(CUSTOM_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_and_catalog_agree() {
        assert_eq!(RECIPES.len(), RECIPE_KEYS.len());
        for (index, key) in RECIPE_KEYS.iter().enumerate() {
            assert_eq!(RECIPES[index].0, *key);
        }
    }

    #[test]
    fn off_recipe_is_dark() {
        assert_eq!(color_of(OFF), Some(Color::OFF));
        assert_eq!(name_for_color(Color::OFF), OFF);
    }

    #[test]
    fn reverse_lookup_falls_back_to_custom() {
        assert_eq!(name_for_color(Color::new(50, 255, 70, 200)), "veg_growth");
        assert_eq!(name_for_color(Color::new(1, 2, 3, 4)), CUSTOM);
    }

    #[test]
    fn unknown_codes_map_to_off() {
        assert_eq!(name_for_code(4), "veg_growth");
        assert_eq!(name_for_code(200), OFF);
        assert_eq!(name_at(16), None);
    }

    #[test]
    fn status_code_marks_custom() {
        assert_eq!(status_code("balanced"), 0);
        assert_eq!(status_code(CUSTOM), CUSTOM_CODE);
    }
}
