use std::error::Error;
use std::io::stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use crossbeam_channel::unbounded;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEvent};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Gauge, Paragraph, Row, Table, Wrap};

use crate::control::api;
use crate::effects::gain_to_db;
use crate::{ChannelStatus, MixerContext, MixerState, MixerStatus, pop_notification};

const TICK_RATE: Duration = Duration::from_millis(100);
const VOLUME_STEP_DB: f32 = 1.0;

#[derive(Default)]
struct AppState {
    status: Option<MixerStatus>,
    selected: usize,
    mode: Mode,
    message: Option<String>,
    notification: Option<String>,
    last_update: Option<Instant>,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    GainInput,
}

struct GainEditor {
    buffer: String,
}

/// Run the ratatui-based developer console until `q` is pressed.
pub fn run(ctx: Arc<MixerContext>) -> Result<(), Box<dyn Error>> {
    setup_terminal()?;

    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let (status_tx, status_rx) = unbounded();
    {
        let ctx = Arc::clone(&ctx);
        std::thread::spawn(move || {
            while !ctx.is_closed() {
                if status_tx.send(api::status(&ctx)).is_err() {
                    break;
                }
                std::thread::sleep(TICK_RATE);
            }
        });
    }

    let mut app = AppState::default();
    let mut gain_editor: Option<GainEditor> = None;

    loop {
        terminal.draw(|frame| draw(frame, &app, gain_editor.as_ref()))?;

        if let Some(status) = try_recv_latest(&status_rx) {
            let channel_len = status.channels.len();
            app.status = Some(status);
            app.last_update = Some(Instant::now());
            app.selected = app.selected.min(channel_len.saturating_sub(1));
        }
        while let Some(notification) = pop_notification() {
            app.notification = Some(format!("{}: {}", notification.source, notification.message));
        }

        if event::poll(Duration::from_millis(10))? {
            if let CEvent::Key(key) = event::read()? {
                if handle_key(&ctx, &mut app, &mut gain_editor, key) {
                    break;
                }
            }
        }
    }

    restore_terminal()?;
    Ok(())
}

fn setup_terminal() -> Result<(), Box<dyn Error>> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    Ok(())
}

fn restore_terminal() -> Result<(), Box<dyn Error>> {
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    Ok(())
}

fn try_recv_latest<T>(rx: &Receiver<T>) -> Option<T> {
    let mut last = None;
    while let Ok(value) = rx.try_recv() {
        last = Some(value);
    }
    last
}

fn volume_db(channel: &ChannelStatus) -> f32 {
    gain_to_db(channel.user_volume.left)
}

fn apply_volume(ctx: &MixerContext, app: &mut AppState, channel: &ChannelStatus, gain_db: f32) {
    app.message = Some(match api::set_user_volume_db(ctx, &channel.name, gain_db) {
        Ok(()) => format!("Set {} volume to {gain_db:.1} dB", channel.name),
        Err(err) => err.to_string(),
    });
}

fn handle_key(
    ctx: &MixerContext,
    app: &mut AppState,
    gain_editor: &mut Option<GainEditor>,
    key: KeyEvent,
) -> bool {
    match app.mode {
        Mode::Normal => match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Up => {
                app.selected = app.selected.saturating_sub(1);
            }
            KeyCode::Down => {
                if let Some(status) = &app.status {
                    if app.selected + 1 < status.channels.len() {
                        app.selected += 1;
                    }
                }
            }
            KeyCode::Char(c @ ('+' | '-')) => {
                if let Some(channel) = current_channel(app) {
                    let step = if c == '+' { VOLUME_STEP_DB } else { -VOLUME_STEP_DB };
                    apply_volume(ctx, app, &channel, volume_db(&channel) + step);
                }
            }
            KeyCode::Char('g') => {
                if let Some(channel) = current_channel(app) {
                    gain_editor.replace(GainEditor {
                        buffer: format!("{:.1}", volume_db(&channel)),
                    });
                    app.mode = Mode::GainInput;
                }
            }
            KeyCode::Char('e') => {
                if let Some(channel) = current_channel(app) {
                    let enable = !channel.is_enabled;
                    app.message = Some(match api::set_enabled(ctx, &channel.name, enable) {
                        Ok(()) => format!(
                            "{} {}",
                            channel.name,
                            if enable { "enabled" } else { "disabled" }
                        ),
                        Err(err) => err.to_string(),
                    });
                }
            }
            KeyCode::Char('m') => {
                ctx.toggle_mute();
                app.message = Some(format!("Output {}", ctx.state().as_str()));
            }
            KeyCode::Char('r') => {
                app.message = Some(format!("Reverb: {}", api::cycle_reverb(ctx)));
            }
            KeyCode::Char('c') => {
                app.message = Some(format!("Chorus: {}", api::cycle_chorus(ctx)));
            }
            KeyCode::Char('x') => {
                app.message = Some(format!("Crossfeed: {}", api::cycle_crossfeed(ctx)));
            }
            KeyCode::Char('f') => {
                if ctx.fast_forward_mode_enabled() {
                    ctx.disable_fast_forward_mode();
                    app.message = Some("Fast-forward off".to_string());
                } else {
                    ctx.enable_fast_forward_mode();
                    app.message = Some("Fast-forward on".to_string());
                }
            }
            _ => {}
        },
        Mode::GainInput => match key.code {
            KeyCode::Esc => {
                gain_editor.take();
                app.mode = Mode::Normal;
            }
            KeyCode::Enter => {
                if let (Some(editor), Some(channel)) = (gain_editor.take(), current_channel(app)) {
                    if let Ok(value) = editor.buffer.trim().parse::<f32>() {
                        apply_volume(ctx, app, &channel, value);
                    }
                }
                app.mode = Mode::Normal;
            }
            KeyCode::Backspace => {
                if let Some(editor) = gain_editor.as_mut() {
                    editor.buffer.pop();
                }
            }
            KeyCode::Char(c) => {
                if let Some(editor) = gain_editor.as_mut() {
                    if c.is_ascii_digit() || matches!(c, '.' | '-' | '+') {
                        editor.buffer.push(c);
                    }
                }
            }
            _ => {}
        },
    }
    false
}

fn current_channel(app: &AppState) -> Option<ChannelStatus> {
    app.status.as_ref()?.channels.get(app.selected).cloned()
}

fn draw(frame: &mut ratatui::Frame<'_>, app: &AppState, gain_editor: Option<&GainEditor>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(4),
        ])
        .split(frame.size());

    draw_header(frame, chunks[0], app);
    draw_channels(frame, chunks[1], app);
    draw_meter(frame, chunks[2], app);
    draw_footer(frame, chunks[3], app);

    if let Some(editor) = gain_editor {
        let area = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(3)])
            .split(frame.size())[1];

        let block = Block::default()
            .title("Set volume (dB), Enter to apply, Esc to cancel")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow));

        let paragraph = Paragraph::new(editor.buffer.clone())
            .block(block)
            .wrap(Wrap { trim: false });

        frame.render_widget(Clear, area);
        frame.render_widget(paragraph, area);
    }
}

fn state_style(state: MixerState) -> Style {
    match state {
        MixerState::On => Style::default().fg(Color::Green),
        MixerState::Muted => Style::default().fg(Color::Yellow),
        MixerState::NoSound | MixerState::Uninitialized => Style::default().fg(Color::Red),
    }
}

fn draw_header(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let block = Block::default().title("Mixer Console").borders(Borders::ALL);

    let content = if let Some(status) = &app.status {
        let settings = format!(
            "Rate: {} Hz    Block: {} frames    Prebuffer: {} ms    Queue: {:.0}%    Master: {:.1} dB",
            status.sample_rate_hz,
            status.blocksize,
            status.prebuffer_ms,
            status.queue_fill * 100.0,
            gain_to_db(status.master_volume.left),
        );
        let presets = Line::from(vec![
            Span::styled(
                status.state.as_str(),
                state_style(status.state).add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!(
                "{}    Reverb: {}    Chorus: {}    Crossfeed: {}    Compressor: {}{}",
                if status.manually_muted { " (manual)" } else { "" },
                status.reverb,
                status.chorus,
                status.crossfeed,
                if status.compressor { "on" } else { "off" },
                if status.fast_forward { "    FAST-FORWARD" } else { "" },
            )),
        ]);
        Paragraph::new(vec![Line::from(settings), presets])
    } else {
        Paragraph::new(Line::from(vec![Span::styled(
            "Waiting for mixer status",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )]))
    };

    frame.render_widget(content.block(block), area);
}

fn draw_channels(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let block = Block::default().title("Channels").borders(Borders::ALL);

    let Some(status) = &app.status else {
        frame.render_widget(Paragraph::new("").block(block), area);
        return;
    };

    let header = Row::new(vec![
        Cell::from(""),
        Cell::from("Name"),
        Cell::from("Rate"),
        Cell::from("Vol (dB)"),
        Cell::from("Lineout"),
        Cell::from("Xfeed"),
        Cell::from("Reverb"),
        Cell::from("Chorus"),
        Cell::from("On"),
        Cell::from("Path"),
        Cell::from("Peak"),
    ])
    .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));

    let rows = status.channels.iter().enumerate().map(|(idx, channel)| {
        let indicator = if idx == app.selected { ">" } else { "" };
        let mut row = Row::new(vec![
            Cell::from(indicator.to_string()),
            Cell::from(channel.name.clone()),
            Cell::from(format!("{}", channel.sample_rate_hz)),
            Cell::from(format!("{:.1}", volume_db(channel))),
            Cell::from(channel.lineout.clone()),
            Cell::from(format!("{:.2}", channel.crossfeed_strength)),
            Cell::from(format!("{:.2}", channel.reverb_level)),
            Cell::from(format!("{:.2}", channel.chorus_level)),
            Cell::from(if channel.is_enabled { "Yes" } else { "No" }),
            Cell::from(channel.rate_path.clone()),
            Cell::from(format!("{:.0}", channel.peak)),
        ]);
        if idx == app.selected {
            row = row.style(Style::default().fg(Color::Yellow));
        }
        row
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(2),
            Constraint::Length(12),
            Constraint::Length(7),
            Constraint::Length(9),
            Constraint::Length(8),
            Constraint::Length(6),
            Constraint::Length(7),
            Constraint::Length(7),
            Constraint::Length(4),
            Constraint::Length(24),
            Constraint::Length(7),
        ],
    )
    .header(header)
    .block(block)
    .column_spacing(1);

    frame.render_widget(table, area);
}

fn draw_meter(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let peak = app.status.as_ref().map(|s| s.peak).unwrap_or(0.0);
    let ratio = f64::from(peak.clamp(0.0, 1.0));
    let color = if ratio > 0.9 { Color::Red } else { Color::Green };
    let gauge = Gauge::default()
        .block(Block::default().title("Master peak").borders(Borders::ALL))
        .gauge_style(Style::default().fg(color))
        .ratio(ratio)
        .label(format!("{:.1} dB", gain_to_db(peak)));
    frame.render_widget(gauge, area);
}

fn draw_footer(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let info = "Up/Down select  +/- volume  g set volume  e enable  m mute  \
                r/c/x reverb/chorus/crossfeed  f fast-forward  q quit";
    let mut lines = vec![Line::from(info)];
    if let Some(message) = &app.message {
        lines.push(Line::from(Span::styled(
            message.clone(),
            Style::default().fg(Color::Green),
        )));
    }
    if let Some(notification) = &app.notification {
        lines.push(Line::from(Span::styled(
            notification.clone(),
            Style::default().fg(Color::Yellow),
        )));
    } else if let Some(updated) = app.last_update {
        let ago = updated.elapsed().as_secs_f32();
        lines.push(Line::from(Span::styled(
            format!("Last update {:.1}s ago", ago),
            Style::default().fg(Color::DarkGray),
        )));
    }

    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, area);
}
