//! Runner state pane: turn, knot, tags and the globals store
//!
//! Variable names are only known to the story compiler, so globals are listed by
//! their path hash.

use super::{border_style, clamp_scroll};
use crate::memory::value::{Hash, HostValue};
use crate::ui::theme::DEFAULT_THEME;
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem},
    Frame,
};

/// Data needed to render the state pane
pub struct StateRenderData<'a> {
    pub turn: u32,
    pub knot: Option<Hash>,
    pub global_tags: &'a [String],
    pub knot_tags: &'a [String],
    pub variables: &'a [(Hash, HostValue)],
}

fn header(title: &str) -> ListItem<'static> {
    ListItem::new(Line::from(Span::styled(
        title.to_string(),
        Style::default()
            .fg(DEFAULT_THEME.primary)
            .add_modifier(Modifier::BOLD),
    )))
}

fn format_host_value(value: &HostValue) -> Span<'static> {
    match value {
        HostValue::Null => Span::styled("void", Style::default().fg(DEFAULT_THEME.comment)),
        HostValue::Bool(b) => Span::styled(b.to_string(), Style::default().fg(DEFAULT_THEME.number)),
        HostValue::Int(i) => Span::styled(i.to_string(), Style::default().fg(DEFAULT_THEME.number)),
        HostValue::Uint(u) => Span::styled(u.to_string(), Style::default().fg(DEFAULT_THEME.number)),
        HostValue::Float(f) => Span::styled(f.to_string(), Style::default().fg(DEFAULT_THEME.number)),
        HostValue::Str(s) => Span::styled(format!("\"{}\"", s), Style::default().fg(DEFAULT_THEME.secondary)),
    }
}

fn tag_items<'a>(items: &mut Vec<ListItem<'a>>, tags: &'a [String]) {
    if tags.is_empty() {
        items.push(ListItem::new(Span::styled(
            "  (none)",
            Style::default().fg(DEFAULT_THEME.comment),
        )));
    }
    for tag in tags {
        items.push(ListItem::new(Span::styled(
            format!("  #{}", tag),
            Style::default().fg(DEFAULT_THEME.tag),
        )));
    }
}

/// Render the state pane
pub fn render_state_pane(
    frame: &mut Frame,
    area: Rect,
    data: StateRenderData<'_>,
    is_focused: bool,
    scroll_offset: &mut usize,
) {
    let block = Block::default()
        .title(" State ")
        .borders(Borders::ALL)
        .border_style(border_style(is_focused));

    let mut items: Vec<ListItem> = Vec::new();
    items.push(ListItem::new(Line::from(vec![
        Span::styled("turn ", Style::default().fg(DEFAULT_THEME.comment)),
        Span::styled(data.turn.to_string(), Style::default().fg(DEFAULT_THEME.number)),
        Span::styled("   knot ", Style::default().fg(DEFAULT_THEME.comment)),
        match data.knot {
            Some(hash) => Span::styled(format!("0x{:08x}", hash), Style::default().fg(DEFAULT_THEME.knot)),
            None => Span::styled("-", Style::default().fg(DEFAULT_THEME.comment)),
        },
    ])));

    items.push(header("Global tags"));
    tag_items(&mut items, data.global_tags);
    items.push(header("Knot tags"));
    tag_items(&mut items, data.knot_tags);

    items.push(header("Variables"));
    if data.variables.is_empty() {
        items.push(ListItem::new(Span::styled(
            "  (none)",
            Style::default().fg(DEFAULT_THEME.comment),
        )));
    }
    for (name, value) in data.variables {
        items.push(ListItem::new(Line::from(vec![
            Span::styled(format!("  0x{:08x} ", name), Style::default().fg(DEFAULT_THEME.knot)),
            Span::styled("= ", Style::default().fg(DEFAULT_THEME.comment)),
            format_host_value(value),
        ])));
    }

    let visible_height = clamp_scroll(scroll_offset, items.len(), area.height);
    let visible: Vec<ListItem> = items
        .into_iter()
        .skip(*scroll_offset)
        .take(visible_height)
        .collect();

    frame.render_widget(List::new(visible).block(block), area);
}
