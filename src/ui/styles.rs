//! # UI Styling Module
//!
//! Centralized styling for the Start/Stop controls and status line.

use crate::sensor::{SessionState, Severity};
use iced::widget::button;
use iced::{Background, Border, Color};

struct Palette {
    base: Color,
    hover: Color,
    pressed: Color,
}

fn solid(background: Color, border: Color) -> button::Style {
    button::Style {
        background: Some(Background::Color(background)),
        text_color: Color::WHITE,
        border: Border {
            color: border,
            width: 1.0,
            radius: 4.0.into(),
        },
        ..Default::default()
    }
}

fn palette_style(palette: Palette) -> impl Fn(&iced::Theme, button::Status) -> button::Style {
    move |_theme: &iced::Theme, status: button::Status| match status {
        button::Status::Active => solid(palette.base, palette.hover),
        button::Status::Hovered => solid(palette.hover, palette.base),
        button::Status::Pressed => solid(palette.pressed, palette.base),
        // Disabled: Muted appearance
        button::Status::Disabled => button::Style {
            background: Some(Background::Color(Color::from_rgb(0.75, 0.75, 0.75))),
            text_color: Color::from_rgb(0.45, 0.45, 0.45),
            border: Border {
                color: Color::from_rgb(0.65, 0.65, 0.65),
                width: 1.0,
                radius: 4.0.into(),
            },
            ..Default::default()
        },
    }
}

/// Style for start button (green theme)
pub fn start_button_style() -> impl Fn(&iced::Theme, button::Status) -> button::Style {
    palette_style(Palette {
        base: Color::from_rgb(0.2, 0.7, 0.2),
        hover: Color::from_rgb(0.3, 0.8, 0.3),
        pressed: Color::from_rgb(0.15, 0.6, 0.15),
    })
}

/// Style for stop button (red theme)
pub fn stop_button_style() -> impl Fn(&iced::Theme, button::Status) -> button::Style {
    palette_style(Palette {
        base: Color::from_rgb(0.8, 0.2, 0.2),
        hover: Color::from_rgb(0.9, 0.3, 0.3),
        pressed: Color::from_rgb(0.7, 0.15, 0.15),
    })
}

pub fn status_color(severity: Severity) -> Color {
    match severity {
        Severity::Info => Color::from_rgb(0.1, 0.55, 0.1),
        Severity::Error => Color::from_rgb(0.8, 0.1, 0.1),
    }
}

pub fn session_state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Idle => "Idle",
        SessionState::Connecting => "Connecting...",
        SessionState::Subscribed => "Receiving",
        SessionState::Draining => "Stopping...",
        SessionState::Disconnected => "Disconnected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_colors_differ() {
        assert_ne!(status_color(Severity::Info), status_color(Severity::Error));
    }

    #[test]
    fn test_session_state_label() {
        assert_eq!(session_state_label(SessionState::Subscribed), "Receiving");
    }
}
