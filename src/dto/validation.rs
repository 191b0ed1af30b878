//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::game::GameCode;

/// Validates that a string is a well-formed game code (`AB12C3` or `LOCAL-AB12C3`).
///
/// # Examples
///
/// ```ignore
/// validate_game_code("AB12C3")       // Ok
/// validate_game_code("local-ab12c3") // Ok - normalised
/// validate_game_code("AB12C")        // Err - too short
/// ```
pub fn validate_game_code(code: &str) -> Result<(), ValidationError> {
    GameCode::parse(code).map(|_| ()).map_err(|_| {
        let mut err = ValidationError::new("game_code_format");
        err.message = Some(
            "Game code must be 6 uppercase letters or digits, optionally prefixed with LOCAL-"
                .into(),
        );
        err
    })
}

/// Validates that a team color looks like a CSS hex color (`#rgb` or `#rrggbb`).
pub fn validate_hex_color(color: &str) -> Result<(), ValidationError> {
    let digits = color.strip_prefix('#').unwrap_or_default();
    let well_formed =
        matches!(digits.len(), 3 | 6) && digits.chars().all(|c| c.is_ascii_hexdigit());
    if !well_formed {
        let mut err = ValidationError::new("color_format");
        err.message = Some(format!("Color must be #rgb or #rrggbb (got `{color}`)").into());
        return Err(err);
    }
    Ok(())
}
