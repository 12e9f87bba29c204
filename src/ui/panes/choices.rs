//! Choice list pane rendering

use super::border_style;
use crate::interpreter::choices::Choice;
use crate::ui::theme::DEFAULT_THEME;
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};

/// Render the choices pane; `selected` is highlighted
pub fn render_choices_pane(
    frame: &mut Frame,
    area: Rect,
    choices: &[Choice],
    selected: usize,
    can_continue: bool,
    is_focused: bool,
) {
    let block = Block::default()
        .title(" Choices ")
        .borders(Borders::ALL)
        .border_style(border_style(is_focused));

    if choices.is_empty() {
        let message = if can_continue {
            "(more text to read)"
        } else {
            "(the story has ended)"
        };
        let paragraph = Paragraph::new(message)
            .block(block)
            .style(Style::default().fg(DEFAULT_THEME.comment));
        frame.render_widget(paragraph, area);
        return;
    }

    let items: Vec<ListItem> = choices
        .iter()
        .enumerate()
        .map(|(i, choice)| {
            let mut style = Style::default().fg(DEFAULT_THEME.choice);
            if i == selected {
                style = style
                    .bg(DEFAULT_THEME.current_line_bg)
                    .add_modifier(Modifier::BOLD);
            }
            let mut spans = vec![
                Span::styled(
                    format!("{:>2}. ", i + 1),
                    Style::default().fg(DEFAULT_THEME.number),
                ),
                Span::styled(choice.text().to_string(), style),
            ];
            for tag in choice.tags() {
                spans.push(Span::styled(
                    format!("  #{}", tag),
                    Style::default().fg(DEFAULT_THEME.tag),
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    frame.render_widget(List::new(items).block(block), area);
}
