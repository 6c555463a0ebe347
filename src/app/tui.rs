use std::fmt::Write as _;
use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap};
use ratatui::{Frame, Terminal};

use super::types::{Field, Record};
use super::ui_utils::{centered_rect, preview, rating_style, truncate_for_log, value_style};

const PAGE_JUMP_STEP: usize = 10;
const TICK: Duration = Duration::from_millis(200);

/// Cursor over the reviewed records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReviewState {
    selected: usize,
    len: usize,
    detail_scroll: u16,
    help: bool,
}

impl ReviewState {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            ..Self::default()
        }
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    fn select(&mut self, index: usize) {
        let index = index.min(self.len.saturating_sub(1));
        if index != self.selected {
            self.detail_scroll = 0;
        }
        self.selected = index;
    }

    pub fn next(&mut self) {
        self.select(self.selected.saturating_add(1));
    }

    pub fn previous(&mut self) {
        self.select(self.selected.saturating_sub(1));
    }

    pub fn page_down(&mut self) {
        self.select(self.selected.saturating_add(PAGE_JUMP_STEP));
    }

    pub fn page_up(&mut self) {
        self.select(self.selected.saturating_sub(PAGE_JUMP_STEP));
    }

    pub fn first(&mut self) {
        self.select(0);
    }

    pub fn last(&mut self) {
        self.select(self.len.saturating_sub(1));
    }

    /// Returns `false` when the key asks to quit.
    pub fn handle_key(&mut self, code: KeyCode) -> bool {
        if self.help {
            self.help = false;
            return !matches!(code, KeyCode::Char('q'));
        }
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Down | KeyCode::Char('j') => self.next(),
            KeyCode::Up | KeyCode::Char('k') => self.previous(),
            KeyCode::PageDown => self.page_down(),
            KeyCode::PageUp => self.page_up(),
            KeyCode::Home | KeyCode::Char('g') => self.first(),
            KeyCode::End | KeyCode::Char('G') => self.last(),
            KeyCode::Char('J') => self.detail_scroll = self.detail_scroll.saturating_add(1),
            KeyCode::Char('K') => self.detail_scroll = self.detail_scroll.saturating_sub(1),
            KeyCode::Char('?') => self.help = true,
            _ => {}
        }
        true
    }
}

pub fn run_review_tui(records: &[Record], label: &str) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let result = review_loop(&mut terminal, records, label);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn review_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    records: &[Record],
    label: &str,
) -> io::Result<()> {
    let mut state = ReviewState::new(records.len());
    loop {
        terminal.draw(|f| render(f, records, label, &state))?;
        if event::poll(TICK)?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
            && !state.handle_key(key.code)
        {
            return Ok(());
        }
    }
}

fn render(f: &mut Frame<'_>, records: &[Record], label: &str, state: &ReviewState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(8)])
        .split(f.area());

    let analyzed = records
        .iter()
        .filter(|r| r.is_resolved(Field::AnalysisText))
        .count();
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            truncate_for_log(label, 60),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("  |  ", Style::default().fg(Color::DarkGray)),
        Span::raw(format!("{} contractors, {analyzed} analyzed", records.len())),
        Span::styled(
            "  (j/k move, PgUp/PgDn jump, ? help, q quit)",
            Style::default().fg(Color::Gray),
        ),
    ]))
    .block(Block::default().borders(Borders::ALL).title("roofscout review"));
    f.render_widget(header, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(chunks[1]);

    let rows = records.iter().map(|r| {
        Row::new(vec![
            Cell::from(truncate_for_log(&r.name, 40)),
            Cell::from(r.rating.clone()).style(rating_style(&r.rating)),
            Cell::from(preview(&r.analysis_text, 40)).style(value_style(&r.analysis_text)),
        ])
    });
    let table = Table::new(
        rows,
        [
            Constraint::Percentage(45),
            Constraint::Length(6),
            Constraint::Min(10),
        ],
    )
    .header(
        Row::new(vec!["Name", "Rating", "Analysis"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(Block::default().borders(Borders::ALL).title("Contractors"))
    .row_highlight_style(Style::default().bg(Color::DarkGray))
    .highlight_symbol("> ");
    let mut table_state = TableState::default();
    if !records.is_empty() {
        table_state.select(Some(state.selected()));
    }
    f.render_stateful_widget(table, body[0], &mut table_state);

    let detail = match records.get(state.selected()) {
        Some(record) => detail_lines(record),
        None => vec![Line::from("No contractors in this file.")],
    };
    let detail = Paragraph::new(detail)
        .block(Block::default().borders(Borders::ALL).title("Details"))
        .wrap(Wrap { trim: false })
        .scroll((state.detail_scroll, 0));
    f.render_widget(detail, body[1]);

    if state.help {
        let area = centered_rect(50, 40, f.area());
        let help = Paragraph::new(vec![
            Line::from("j / Down      next contractor"),
            Line::from("k / Up        previous contractor"),
            Line::from("PgDn / PgUp   jump 10"),
            Line::from("g / G         first / last"),
            Line::from("J / K         scroll details"),
            Line::from("q / Esc       quit"),
        ])
        .block(Block::default().borders(Borders::ALL).title("Keys"));
        f.render_widget(Clear, area);
        f.render_widget(help, area);
    }
}

fn detail_lines(record: &Record) -> Vec<Line<'static>> {
    let label = Style::default().fg(Color::Gray);
    let mut lines = vec![
        Line::from(Span::styled(
            record.name.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    for (title, field) in [
        ("Rating", Field::Rating),
        ("Phone", Field::PhoneNumber),
        ("Certifications", Field::Certifications),
        ("Profile", Field::DetailUrl),
    ] {
        let value = record.get(field).to_string();
        lines.push(Line::from(vec![
            Span::styled(format!("{title}: "), label),
            Span::styled(value.clone(), value_style(&value)),
        ]));
    }
    for (title, field) in [("About", Field::AboutText), ("Analysis", Field::AnalysisText)] {
        let value = record.get(field);
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            title,
            label.add_modifier(Modifier::UNDERLINED),
        )));
        lines.extend(
            value
                .lines()
                .map(|l| Line::from(Span::styled(l.to_string(), value_style(value)))),
        );
    }
    lines
}

/// Text rendering used with `--no-tui`.
pub fn render_plain(records: &[Record]) -> String {
    let rule = "=".repeat(72);
    let mut out = String::new();
    for (i, record) in records.iter().enumerate() {
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "[{}/{}] {}", i + 1, records.len(), record.name);
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Rating:         {}", record.rating);
        let _ = writeln!(out, "Phone:          {}", record.phone_number);
        let _ = writeln!(out, "Certifications: {}", record.certifications);
        let _ = writeln!(out, "Profile:        {}", record.detail_url);
        let _ = writeln!(out, "\nAbout:\n{}", record.about_text);
        let _ = writeln!(out, "\nAnalysis:\n{}\n", record.analysis_text);
    }
    if records.is_empty() {
        out.push_str("No contractors in this file.\n");
    }
    out
}
