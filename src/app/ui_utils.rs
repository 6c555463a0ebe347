use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};

use super::analysis::ANALYSIS_ERROR;
use super::types::SENTINEL;

pub fn truncate_for_log(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "..."
}

/// First line of `input`, shortened for a table cell.
pub fn preview(input: &str, max_chars: usize) -> String {
    let first = input.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    truncate_for_log(first, max_chars)
}

pub fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

pub fn rating_style(rating: &str) -> Style {
    match rating.trim().parse::<f32>() {
        Ok(r) if r >= 4.5 => Style::default()
            .fg(Color::Green)
            .add_modifier(Modifier::BOLD),
        Ok(r) if r >= 4.0 => Style::default().fg(Color::LightGreen),
        Ok(r) if r >= 3.0 => Style::default().fg(Color::Yellow),
        Ok(_) => Style::default().fg(Color::Red),
        Err(_) => Style::default().fg(Color::DarkGray),
    }
}

/// Colour for a stored field: grey when unresolved, red for failed calls.
pub fn value_style(value: &str) -> Style {
    match value.trim() {
        "" | SENTINEL => Style::default().fg(Color::DarkGray),
        ANALYSIS_ERROR => Style::default()
            .fg(Color::LightRed)
            .add_modifier(Modifier::BOLD),
        _ => Style::default(),
    }
}
