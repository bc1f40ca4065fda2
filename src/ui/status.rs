use crossterm::{
    event::{KeyboardEnhancementFlags, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags},
    execute,
    terminal::{
        EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
        supports_keyboard_enhancement,
    },
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};
use std::io;
use tracing::debug;

use crate::audio::{LooperState, StatsSnapshot};
use crate::config::KeyMap;

/// Everything a status display may show.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub state: LooperState,
    pub mute: bool,
    /// True while the loop is audible (also during an overdub take).
    pub playback_active: bool,
    /// Length of the current loop in seconds, if one is committed.
    pub loop_secs: Option<f64>,
    /// Seconds captured so far in the take in progress.
    pub recording_secs: Option<f64>,
    pub last_take: Option<String>,
    /// Last error or notice surfaced to the user.
    pub message: Option<String>,
    pub stats: StatsSnapshot,
}

/// Renders looper status. Fire-and-forget: failures never reach the core.
pub trait StatusDisplay: Send {
    fn render(&mut self, report: &StatusReport);
}

/// Terminal stand-in for the pedal's LCD.
pub struct TerminalStatus {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    keys: KeyMap,
    exit_hold: String,
    devices: String,
    enhanced_keys: bool,
}

impl TerminalStatus {
    /// `exit_hold` is the long-press label shown in the footer, e.g. `3s`.
    pub fn new(
        keys: KeyMap,
        exit_hold: String,
        input_device: &str,
        output_device: &str,
    ) -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;

        // Key release reporting makes held buttons exact where supported.
        let enhanced_keys = supports_keyboard_enhancement().unwrap_or(false);
        if enhanced_keys {
            execute!(
                stdout,
                PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
            )?;
        }

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        Ok(Self {
            terminal,
            keys,
            exit_hold,
            devices: format!("{} -> {}", input_device, output_device),
            enhanced_keys,
        })
    }

    fn state_style(state: LooperState) -> Style {
        let color = match state {
            LooperState::Idle => Color::Gray,
            LooperState::Recording => Color::Red,
            LooperState::Playing => Color::Green,
            LooperState::ShuttingDown => Color::Yellow,
        };
        Style::default().fg(color).add_modifier(Modifier::BOLD)
    }

    fn lines(&self, report: &StatusReport) -> Vec<Line<'static>> {
        let mut state_spans = vec![
            Span::raw("State: "),
            Span::styled(report.state.label(), Self::state_style(report.state)),
        ];
        if report.state == LooperState::Recording && report.playback_active {
            state_spans.push(Span::raw(" (loop playing)"));
        }
        if let Some(secs) = report.recording_secs {
            state_spans.push(Span::raw(format!("  {:.1} s", secs)));
        }

        let mute = if report.mute {
            Span::styled("ON", Style::default().fg(Color::Yellow))
        } else {
            Span::raw("OFF")
        };

        let loop_line = match (report.loop_secs, &report.last_take) {
            (Some(secs), Some(take)) => format!("Loop: {:.2} s  ({})", secs, take),
            (Some(secs), None) => format!("Loop: {:.2} s", secs),
            (None, _) => "Loop: none recorded".to_string(),
        };

        let stats = report.stats;
        let mut lines = vec![
            Line::from(state_spans),
            Line::from(vec![Span::raw("Mute: "), mute]),
            Line::from(loop_line),
            Line::from(format!(
                "Xruns: in {} / out {}  Take drops: {} / {}",
                stats.input_overruns,
                stats.output_underruns,
                stats.take_overflows,
                stats.take_contention
            )),
        ];
        if let Some(message) = &report.message {
            lines.push(Line::from(Span::styled(
                message.clone(),
                Style::default().fg(Color::Magenta),
            )));
        }
        lines
    }

    fn help_line(&self) -> Line<'static> {
        Line::from(help_text(&self.keys, &self.exit_hold))
    }
}

fn help_text(keys: &KeyMap, exit_hold: &str) -> String {
    format!(
        "[{}] record  [{}] play/stop  [{}] mute  hold [{}] {}: exit  [q] quit",
        keys.record, keys.play_stop, keys.mute, keys.exit, exit_hold
    )
}

impl StatusDisplay for TerminalStatus {
    fn render(&mut self, report: &StatusReport) {
        let lines = self.lines(report);
        let help = self.help_line();
        let title = format!(" pedal-looper  {} ", self.devices);

        let result = self.terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(6), Constraint::Length(3)])
                .split(f.area());

            let status = Paragraph::new(lines)
                .block(Block::default().borders(Borders::ALL).title(title));
            f.render_widget(status, chunks[0]);

            let footer = Paragraph::new(help).block(Block::default().borders(Borders::ALL));
            f.render_widget(footer, chunks[1]);
        });

        if let Err(e) = result {
            debug!("status render failed: {}", e);
        }
    }
}

impl Drop for TerminalStatus {
    fn drop(&mut self) {
        if self.enhanced_keys {
            let _ = execute!(self.terminal.backend_mut(), PopKeyboardEnhancementFlags);
        }
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}
