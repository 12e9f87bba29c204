//! Story text pane rendering

use super::{border_style, clamp_scroll};
use crate::ui::theme::DEFAULT_THEME;
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Padding, Paragraph},
    Frame,
};

/// One line of story output as shown in the pane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoryLine {
    Text { text: String, tags: Vec<String> },
    /// The choice the reader picked, echoed back
    Chosen(String),
    Error(String),
}

impl StoryLine {
    fn to_item(&self) -> ListItem<'_> {
        match self {
            StoryLine::Text { text, tags } => {
                let mut spans = vec![Span::styled(
                    text.as_str(),
                    Style::default().fg(DEFAULT_THEME.fg),
                )];
                for tag in tags {
                    spans.push(Span::styled(
                        format!("  #{}", tag),
                        Style::default().fg(DEFAULT_THEME.tag),
                    ));
                }
                ListItem::new(Line::from(spans))
            }
            StoryLine::Chosen(text) => ListItem::new(Line::from(Span::styled(
                format!("> {}", text),
                Style::default()
                    .fg(DEFAULT_THEME.choice)
                    .add_modifier(Modifier::ITALIC),
            ))),
            StoryLine::Error(message) => ListItem::new(Line::from(Span::styled(
                format!("! {}", message),
                Style::default().fg(DEFAULT_THEME.error),
            ))),
        }
    }
}

/// Render the story text pane
pub fn render_story_pane(
    frame: &mut Frame,
    area: Rect,
    lines: &[StoryLine],
    is_focused: bool,
    scroll_offset: &mut usize,
) {
    let block = Block::default()
        .title(" Story ")
        .borders(Borders::ALL)
        .border_style(border_style(is_focused));

    if lines.is_empty() {
        let paragraph = Paragraph::new("(no text yet, press → to continue)")
            .block(block)
            .style(Style::default().fg(DEFAULT_THEME.comment));
        frame.render_widget(paragraph, area);
        return;
    }

    let block = block.padding(Padding::new(1, 0, 0, 0));
    let visible_height = clamp_scroll(scroll_offset, lines.len(), area.height);

    let visible_items: Vec<ListItem> = lines
        .iter()
        .skip(*scroll_offset)
        .take(visible_height)
        .map(StoryLine::to_item)
        .collect();

    frame.render_widget(List::new(visible_items).block(block), area);
}
