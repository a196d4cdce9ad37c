use crate::terminal::Terminal;
use crossterm::style::Color;

pub const GRID_HELP: &str = "\
LEDGRID
───────────────────────────
q / Esc    quit
space      pause
1-9, 0     frame rate
+ / -      cell pitch
[ / ]      gain
d          threshold damping 1/2/4
s          refresh / interval scheduler
Shift+0-9  color scheme
?          close help";

pub const PRESET_HELP: &str = "\
LEDGRID PRESETS
───────────────────────────
q / Esc    quit
space      pause
n / p      next / previous preset
m          cycle mesh size
a          auto-advance on/off
r          randomize on/off
[ / ]      gain
Shift+0-9  color scheme
?          close help";

/// Draws a centered box with `text` into the back buffer.
pub fn render_help_overlay(term: &mut Terminal, text: &str) {
    render_box(term, text, Color::White, Color::Grey);
}

/// A blocking notice, e.g. when the microphone was refused.
pub fn render_notice(term: &mut Terminal, text: &str) {
    render_box(term, text, Color::Red, Color::White);
}

fn render_box(term: &mut Terminal, text: &str, border: Color, fg: Color) {
    if text.is_empty() {
        return;
    }
    let (width, height) = term.size();
    let lines: Vec<&str> = text.lines().collect();
    let max_width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let box_width = max_width + 4; // 2 chars padding each side
    let box_height = lines.len() + 2;

    let start_x = ((width as usize).saturating_sub(box_width) / 2) as i32;
    let start_y = ((height as usize).saturating_sub(box_height) / 2) as i32;
    let right = start_x + box_width as i32 - 1;
    let bottom = start_y + box_height as i32 - 1;

    term.set(start_x, start_y, '┌', Some(border), false);
    term.set(right, start_y, '┐', Some(border), false);
    term.set(start_x, bottom, '└', Some(border), false);
    term.set(right, bottom, '┘', Some(border), false);
    for x in start_x + 1..right {
        term.set(x, start_y, '─', Some(border), false);
        term.set(x, bottom, '─', Some(border), false);
    }

    for (i, line) in lines.iter().enumerate() {
        let y = start_y + 1 + i as i32;
        term.set(start_x, y, '│', Some(border), false);
        let padding = max_width.saturating_sub(line.chars().count());
        let padded = format!(" {}{} ", line, " ".repeat(padding));
        term.set_str(start_x + 1, y, &padded, Some(fg), i == 0);
        term.set(right, y, '│', Some(border), false);
    }
}
