use crate::constants::Degree;
use crate::skypatch_errors::SkyPatchError;

/// Split a sexagesimal string on `:` or whitespace into exactly three components.
fn split_sexagesimal<'a>(field: &str, value: &'a str) -> Result<[&'a str; 3], SkyPatchError> {
    let parts: Vec<&str> = value
        .split(|c: char| c == ':' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect();
    match parts.as_slice() {
        [a, b, c] => Ok([*a, *b, *c]),
        _ => Err(SkyPatchError::invalid_input(
            field,
            "expected three sexagesimal components",
        )),
    }
}

fn parse_component(field: &str, name: &str, value: &str) -> Result<f64, SkyPatchError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| SkyPatchError::invalid_input(field, format!("invalid {name} value")))
}

/// Parse a right ascension string to degrees
///
/// Arguments
/// ---------
/// * `ra`: a string representing the right ascension as `HH:MM:SS.SS` (or `HH MM SS.SS`)
///
/// Returns
/// -------
/// * The right ascension in degrees, or [`SkyPatchError::InvalidInput`] on the `ra` field
///   when a component is malformed or out of range (hours < 24, minutes and seconds < 60).
pub fn parse_ra_to_deg(ra: &str) -> Result<Degree, SkyPatchError> {
    let [h, m, s] = split_sexagesimal("ra", ra)?;

    let h = parse_component("ra", "hh", h)?;
    let m = parse_component("ra", "mm", m)?;
    let s = parse_component("ra", "ss", s)?;

    if !(0.0..24.0).contains(&h) || h.fract() != 0.0 {
        return Err(SkyPatchError::invalid_input("ra", "invalid hh value for hh:mm:ss format"));
    }
    if !(0.0..60.0).contains(&m) || m.fract() != 0.0 {
        return Err(SkyPatchError::invalid_input("ra", "invalid mm value for hh:mm:ss format"));
    }
    if !(0.0..60.0).contains(&s) {
        return Err(SkyPatchError::invalid_input("ra", "invalid ss value for hh:mm:ss format"));
    }

    Ok((h + m / 60.0 + s / 3600.0) * 15.0)
}

/// Parse a declination string to degrees
///
/// Arguments
/// ---------
/// * `dec`: a string representing the declination as `±DD:MM:SS.SS` (or `±DD MM SS.SS`)
///
/// Returns
/// -------
/// * The declination in degrees, or [`SkyPatchError::InvalidInput`] on the `dec` field
///   when a component is malformed or out of range (|dd| < 90, minutes and seconds < 60).
pub fn parse_dec_to_deg(dec: &str) -> Result<Degree, SkyPatchError> {
    let [d, m, s] = split_sexagesimal("dec", dec)?;

    let sign = if d.starts_with('-') { -1.0 } else { 1.0 };
    let d = parse_component("dec", "dd", d.trim_start_matches(&['-', '+'][..]))?;
    let m = parse_component("dec", "mm", m)?;
    let s = parse_component("dec", "ss", s)?;

    if !(0.0..90.0).contains(&d) || d.fract() != 0.0 {
        return Err(SkyPatchError::invalid_input("dec", "invalid dd value for dd:mm:ss format"));
    }
    if !(0.0..60.0).contains(&m) || m.fract() != 0.0 {
        return Err(SkyPatchError::invalid_input("dec", "invalid mm value for dd:mm:ss format"));
    }
    if !(0.0..60.0).contains(&s) {
        return Err(SkyPatchError::invalid_input("dec", "invalid ss value for dd:mm:ss format"));
    }

    Ok(sign * (d + m / 60.0 + s / 3600.0))
}
