//! CSS color value parsing and luminance math for the contrast pass.
//! One pure entry point, `parse_color`, handles hex, rgb[a]() and
//! hsl[a]() in both comma and space syntaxes; anything unrecognized is
//! `None` and the caller skips the element rather than erroring.

/// Color with channels in 0..=255 and alpha in 0.0..=1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f64,
}

impl Rgba {
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Rgba { r, g, b, a: 1.0 }
    }

    pub const WHITE: Rgba = Rgba::opaque(255, 255, 255);
    pub const BLACK: Rgba = Rgba::opaque(0, 0, 0);
    pub const TRANSPARENT: Rgba = Rgba {
        r: 0,
        g: 0,
        b: 0,
        a: 0.0,
    };

    pub fn is_opaque(&self) -> bool {
        self.a >= 1.0
    }
}

pub fn parse_color(input: &str) -> Option<Rgba> {
    let s = input.trim();
    match s.to_ascii_lowercase().as_str() {
        "transparent" => return Some(Rgba::TRANSPARENT),
        "white" => return Some(Rgba::WHITE),
        "black" => return Some(Rgba::BLACK),
        _ => {}
    }
    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex(hex);
    }
    let lower = s.to_ascii_lowercase();
    if let Some(args) = func_args(&lower, "rgba").or_else(|| func_args(&lower, "rgb")) {
        return parse_rgb_args(&args);
    }
    if let Some(args) = func_args(&lower, "hsla").or_else(|| func_args(&lower, "hsl")) {
        return parse_hsl_args(&args);
    }
    None
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    let nibble = |c: u8| (c as char).to_digit(16).map(|d| d as u8);
    let bytes = hex.as_bytes();
    match bytes.len() {
        3 | 4 => {
            let mut ch = [0u8; 4];
            for (i, &b) in bytes.iter().enumerate() {
                let n = nibble(b)?;
                ch[i] = n * 16 + n;
            }
            let a = if bytes.len() == 4 {
                ch[3] as f64 / 255.0
            } else {
                1.0
            };
            Some(Rgba {
                r: ch[0],
                g: ch[1],
                b: ch[2],
                a,
            })
        }
        6 | 8 => {
            let mut ch = [0u8; 4];
            for i in 0..bytes.len() / 2 {
                ch[i] = nibble(bytes[2 * i])? * 16 + nibble(bytes[2 * i + 1])?;
            }
            let a = if bytes.len() == 8 {
                ch[3] as f64 / 255.0
            } else {
                1.0
            };
            Some(Rgba {
                r: ch[0],
                g: ch[1],
                b: ch[2],
                a,
            })
        }
        _ => None,
    }
}

/// Split `name(...)` into argument tokens, accepting both `a, b, c` and
/// `a b c / d` spellings.
fn func_args(s: &str, name: &str) -> Option<Vec<String>> {
    let rest = s.strip_prefix(name)?.trim_start();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    let normalized = inner.replace(',', " ").replace('/', " ");
    let args: Vec<String> = normalized
        .split_whitespace()
        .map(|t| t.to_string())
        .collect();
    if args.is_empty() {
        None
    } else {
        Some(args)
    }
}

fn parse_channel(tok: &str) -> Option<u8> {
    if let Some(pct) = tok.strip_suffix('%') {
        let v: f64 = pct.parse().ok()?;
        Some((v.clamp(0.0, 100.0) / 100.0 * 255.0).round() as u8)
    } else {
        let v: f64 = tok.parse().ok()?;
        Some(v.clamp(0.0, 255.0).round() as u8)
    }
}

fn parse_alpha(tok: &str) -> Option<f64> {
    if let Some(pct) = tok.strip_suffix('%') {
        let v: f64 = pct.parse().ok()?;
        Some((v / 100.0).clamp(0.0, 1.0))
    } else {
        let v: f64 = tok.parse().ok()?;
        Some(v.clamp(0.0, 1.0))
    }
}

fn parse_rgb_args(args: &[String]) -> Option<Rgba> {
    if args.len() != 3 && args.len() != 4 {
        return None;
    }
    let r = parse_channel(&args[0])?;
    let g = parse_channel(&args[1])?;
    let b = parse_channel(&args[2])?;
    let a = if args.len() == 4 {
        parse_alpha(&args[3])?
    } else {
        1.0
    };
    Some(Rgba { r, g, b, a })
}

fn parse_hsl_args(args: &[String]) -> Option<Rgba> {
    if args.len() != 3 && args.len() != 4 {
        return None;
    }
    let h: f64 = args[0].trim_end_matches("deg").parse().ok()?;
    let s: f64 = args[1].strip_suffix('%')?.parse().ok()?;
    let l: f64 = args[2].strip_suffix('%')?.parse().ok()?;
    let a = if args.len() == 4 {
        parse_alpha(&args[3])?
    } else {
        1.0
    };
    let (r, g, b) = hsl_to_rgb(h.rem_euclid(360.0), s / 100.0, l / 100.0);
    Some(Rgba { r, g, b, a })
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (u8, u8, u8) {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let hp = h / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r1, g1, b1) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    (
        ((r1 + m) * 255.0).round() as u8,
        ((g1 + m) * 255.0).round() as u8,
        ((b1 + m) * 255.0).round() as u8,
    )
}

/// W3C relative luminance over linearized sRGB channels, in 0.0..=1.0.
pub fn relative_luminance(c: &Rgba) -> f64 {
    fn linear(channel: u8) -> f64 {
        let v = channel as f64 / 255.0;
        if v <= 0.03928 {
            v / 12.92
        } else {
            ((v + 0.055) / 1.055).powf(2.4)
        }
    }
    0.2126 * linear(c.r) + 0.7152 * linear(c.g) + 0.0722 * linear(c.b)
}

/// Composite `fg` over `bg` (source-over).
pub fn composite_over(fg: &Rgba, bg: &Rgba) -> Rgba {
    let fa = fg.a;
    let ba = bg.a;
    let out_a = fa + ba * (1.0 - fa);
    if out_a <= 0.0 {
        return Rgba::TRANSPARENT;
    }
    let blend = |f: u8, b: u8| -> u8 {
        let v = (f as f64 * fa + b as f64 * ba * (1.0 - fa)) / out_a;
        v.round().clamp(0.0, 255.0) as u8
    };
    Rgba {
        r: blend(fg.r, bg.r),
        g: blend(fg.g, bg.g),
        b: blend(fg.b, bg.b),
        a: out_a,
    }
}
