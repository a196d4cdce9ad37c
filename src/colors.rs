use crossterm::event::KeyCode;
use crossterm::style::Color;

/// Scheme that paints each cell in its own excitation hue
pub const HUE_SCHEME: u8 = 8;

/// Shared color scheme state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorState {
    pub scheme: u8,
}

impl ColorState {
    pub fn new(default_scheme: u8) -> Self {
        Self {
            scheme: default_scheme.min(9),
        }
    }

    /// Handle color scheme key input. Returns true if key was handled.
    pub fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('!') => self.scheme = 1, // Shift+1: fire
            KeyCode::Char('@') => self.scheme = 2, // Shift+2: ice
            KeyCode::Char('#') => self.scheme = 3, // Shift+3: pink
            KeyCode::Char('$') => self.scheme = 4, // Shift+4: gold
            KeyCode::Char('%') => self.scheme = 5, // Shift+5: electric
            KeyCode::Char('^') => self.scheme = 6, // Shift+6: lava
            KeyCode::Char('&') => self.scheme = 7, // Shift+7: mono
            KeyCode::Char('*') => self.scheme = 8, // Shift+8: hue
            KeyCode::Char('(') => self.scheme = 9, // Shift+9: neon
            KeyCode::Char(')') => self.scheme = 0, // Shift+0: green
            _ => return false,
        }
        true
    }

    pub fn name(&self) -> &'static str {
        match self.scheme {
            1 => "fire",
            2 => "ice",
            3 => "pink",
            4 => "gold",
            5 => "electric",
            6 => "lava",
            7 => "mono",
            8 => "hue",
            9 => "neon",
            _ => "green",
        }
    }
}

/// HSL to 8-bit RGB. `hue` in degrees, `s` and `l` in 0..=1.
pub fn hsl_to_rgb(hue: f32, s: f32, l: f32) -> (u8, u8, u8) {
    let h = if hue.is_finite() { hue.rem_euclid(360.0) } else { 0.0 };
    let s = s.clamp(0.0, 1.0);
    let l = l.clamp(0.0, 1.0);
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = l - c / 2.0;
    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let to_byte = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    (to_byte(r), to_byte(g), to_byte(b))
}

/// Colour of a lit cell. `brightness` 1.0 is the fresh flash, 0.0 is off.
pub fn cell_color(scheme: u8, hue: f32, brightness: f32) -> Color {
    let b = brightness.clamp(0.0, 1.0);
    if scheme == HUE_SCHEME {
        let (r, g, bl) = hsl_to_rgb(hue, 1.0, 0.5 * b);
        return Color::Rgb { r, g, b: bl };
    }
    // warm end for quiet cells, hot end for fresh ones
    let (cool, hot): ((f32, f32, f32), (f32, f32, f32)) = match scheme {
        1 => ((180.0, 20.0, 0.0), (255.0, 230.0, 60.0)),
        2 => ((0.0, 40.0, 160.0), (120.0, 255.0, 255.0)),
        3 => ((120.0, 0.0, 120.0), (255.0, 120.0, 255.0)),
        4 => ((140.0, 100.0, 0.0), (255.0, 240.0, 160.0)),
        5 => ((0.0, 120.0, 140.0), (230.0, 255.0, 255.0)),
        6 => ((140.0, 0.0, 20.0), (255.0, 60.0, 200.0)),
        7 => ((90.0, 90.0, 90.0), (255.0, 255.0, 255.0)),
        9 => ((20.0, 0.0, 160.0), (255.0, 60.0, 255.0)),
        _ => ((0.0, 90.0, 0.0), (160.0, 255.0, 160.0)),
    };
    let mix = |a: f32, z: f32| ((a + (z - a) * b) * b).round().clamp(0.0, 255.0) as u8;
    Color::Rgb {
        r: mix(cool.0, hot.0),
        g: mix(cool.1, hot.1),
        b: mix(cool.2, hot.2),
    }
}

/// Color from scheme for 4-level intensity (0-3), used for text accents.
pub fn scheme_color(scheme: u8, intensity: u8, bold: bool) -> (Color, bool) {
    match scheme {
        1 => match intensity {
            0 => (Color::DarkRed, false),
            1 => (Color::Red, false),
            2 => (Color::DarkYellow, bold),
            _ => (Color::Yellow, true),
        },
        2 => match intensity {
            0 => (Color::DarkBlue, false),
            1 => (Color::Blue, false),
            2 => (Color::Cyan, bold),
            _ => (Color::Cyan, true),
        },
        7 => match intensity {
            0 => (Color::DarkGrey, false),
            1 => (Color::Grey, false),
            2 => (Color::White, bold),
            _ => (Color::White, true),
        },
        8 => match intensity {
            0 => (Color::Red, false),
            1 => (Color::Yellow, false),
            2 => (Color::Green, bold),
            _ => (Color::Cyan, true),
        },
        _ => match intensity {
            0 => (Color::DarkGreen, false),
            1 => (Color::Green, false),
            2 => (Color::Green, true),
            _ => (Color::White, true),
        },
    }
}
