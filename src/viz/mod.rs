//! Terminal rendering of the visitor globe.

pub mod globe;

use crate::terminal::Terminal;
use crossterm::event::KeyCode;
use crossterm::style::Color;

/// Runtime state for the interactive controls.
pub struct VizState {
    pub speed: f32,
    pub paused: bool,
    pub show_help: bool,
    help: &'static str,
}

impl VizState {
    pub fn new(initial_speed: f32, help: &'static str) -> Self {
        Self {
            speed: initial_speed,
            paused: false,
            show_help: false,
            help,
        }
    }

    /// Handle a shared keypress, returns true if the app should quit.
    pub fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char(' ') => self.paused = !self.paused,
            KeyCode::Char('?') | KeyCode::Char('h') => self.show_help = !self.show_help,
            // Number keys: 1=fastest, 9=slowest, 0=slowest still
            KeyCode::Char(c) if c.is_ascii_digit() => {
                let n = c.to_digit(10).unwrap_or(0) as u8;
                self.speed = match n {
                    1 => 0.005,
                    2 => 0.01,
                    3 => 0.02,
                    4 => 0.03,
                    5 => 0.05,
                    6 => 0.07,
                    7 => 0.1,
                    8 => 0.15,
                    _ => 0.2,
                };
            }
            _ => {}
        }
        false
    }

    /// Draw the help overlay in the top-right corner when toggled on.
    pub fn render_help(&self, term: &mut Terminal, width: u16, _height: u16) {
        if !self.show_help {
            return;
        }
        let lines: Vec<&str> = self.help.lines().collect();
        let box_w = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as i32 + 2;
        let x = width as i32 - box_w - 1;
        for (i, line) in lines.iter().enumerate() {
            term.set_str(x, 1 + i as i32, line, Some(Color::DarkGrey), false);
        }
    }
}
