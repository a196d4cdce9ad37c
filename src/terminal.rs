use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{poll, read, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute, queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
    terminal::{
        disable_raw_mode, enable_raw_mode, size, Clear, ClearType, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use std::io::{self, stdout, Write};
use std::time::Duration;

/// Terminal abstraction for rendering
pub struct Terminal {
    width: u16,
    height: u16,
    buffer: Vec<Cell>,
    /// What is on screen now; `None` forces a full redraw
    shown: Option<Vec<Cell>>,
    alternate_screen: bool,
}

/// A single cell in the terminal buffer
#[derive(Clone, Copy, PartialEq)]
pub struct Cell {
    pub ch: char,
    pub fg: Option<Color>,
    pub bold: bool,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            fg: None,
            bold: false,
        }
    }
}

/// Input the run loops care about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Key(KeyCode, KeyModifiers),
    Resize(u16, u16),
}

impl Terminal {
    /// Initialize the terminal for drawing
    pub fn new(alternate_screen: bool) -> io::Result<Self> {
        let (width, height) = size()?;

        if alternate_screen {
            enable_raw_mode()?;
            execute!(stdout(), EnterAlternateScreen, Hide, Clear(ClearType::All))?;
        }

        Ok(Self {
            width,
            height,
            buffer: vec![Cell::default(); width as usize * height as usize],
            shown: None,
            alternate_screen,
        })
    }

    /// Get terminal dimensions
    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    /// Re-reads the real terminal size. Returns true if it changed.
    pub fn refresh_size(&mut self) -> io::Result<bool> {
        let (w, h) = size()?;
        if (w, h) == (self.width, self.height) {
            return Ok(false);
        }
        self.resize(w, h);
        Ok(true)
    }

    /// Reallocates the buffer and schedules a full redraw
    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.buffer = vec![Cell::default(); width as usize * height as usize];
        self.shown = None;
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.fill(Cell::default());
    }

    /// Clear the actual terminal
    pub fn clear_screen(&mut self) -> io::Result<()> {
        execute!(stdout(), Clear(ClearType::All))?;
        self.shown = None;
        Ok(())
    }

    /// Set a character at position with optional color
    pub fn set(&mut self, x: i32, y: i32, ch: char, fg: Option<Color>, bold: bool) {
        if let Some(i) = self.index(x, y) {
            self.buffer[i] = Cell { ch, fg, bold };
        }
    }

    /// Set a string starting at position
    pub fn set_str(&mut self, x: i32, y: i32, s: &str, fg: Option<Color>, bold: bool) {
        for (i, ch) in s.chars().enumerate() {
            self.set(x + i as i32, y, ch, fg, bold);
        }
    }

    /// Fill a rectangle, clipped to the screen
    pub fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32, ch: char, fg: Option<Color>) {
        for row in y..y + h {
            for col in x..x + w {
                self.set(col, row, ch, fg, false);
            }
        }
    }

    /// Writes the cells that changed since the last present
    pub fn present(&mut self) -> io::Result<()> {
        let mut out = stdout().lock();
        let width = self.width as usize;
        for (i, cell) in self.buffer.iter().enumerate() {
            if let Some(shown) = &self.shown {
                if shown.get(i) == Some(cell) {
                    continue;
                }
            }
            let x = (i % width.max(1)) as u16;
            let y = (i / width.max(1)) as u16;
            queue!(out, MoveTo(x, y))?;
            if cell.bold {
                queue!(out, SetAttribute(Attribute::Bold))?;
            }
            match cell.fg {
                Some(color) => queue!(out, SetForegroundColor(color), Print(cell.ch), ResetColor)?,
                None => queue!(out, Print(cell.ch))?,
            }
            if cell.bold {
                queue!(out, SetAttribute(Attribute::Reset))?;
            }
        }
        out.flush()?;
        self.shown = Some(self.buffer.clone());
        Ok(())
    }

    /// Blocks up to `timeout` for a key press or a resize.
    pub fn wait_input(&self, timeout: Duration) -> io::Result<Option<Input>> {
        if !poll(timeout)? {
            return Ok(None);
        }
        Ok(match read()? {
            Event::Key(key) if key.kind != KeyEventKind::Release => {
                Some(Input::Key(key.code, key.modifiers))
            }
            Event::Resize(w, h) => Some(Input::Resize(w, h)),
            _ => None,
        })
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x >= 0 && x < self.width as i32 && y >= 0 && y < self.height as i32 {
            Some(y as usize * self.width as usize + x as usize)
        } else {
            None
        }
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        if self.alternate_screen {
            let _ = execute!(stdout(), ResetColor, Show, LeaveAlternateScreen);
            let _ = disable_raw_mode();
        }
    }
}
