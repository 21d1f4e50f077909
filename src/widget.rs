use eframe::egui::{
    pos2, vec2, Align2, Button, Color32, FontId, Label, RichText, Rounding, Sense, Shape, Stroke, Ui,
};

use crate::device::LinkStatus;
use crate::feed::ChartData;


const ALPHA_COLOR: Color32 = Color32::from_rgb(75, 192, 192);
const THETA_COLOR: Color32 = Color32::from_rgb(153, 102, 255);
const CHART_MAX: f64 = 100.0;
const CHART_HEIGHT: f32 = 180.0;


pub fn get_heart_rate_label(heart_rate: &str) -> Label {
    let live_hr_text = RichText::new(format!("HR: {heart_rate}"))
        .color(Color32::RED)
        .background_color(Color32::WHITE)
        .size(40.0);

    Label::new(live_hr_text)
}

pub fn get_metric_label(name: &str, value: &str) -> Label {
    Label::new(RichText::new(format!("{name}: {value}")).size(20.0))
}

pub fn get_status_label(status: LinkStatus, text: &str) -> Label {
    let color = match status {
        LinkStatus::Connected => Color32::GREEN,
        LinkStatus::Connecting => Color32::YELLOW,
        LinkStatus::Disconnected => Color32::GRAY,
    };
    Label::new(RichText::new(text).color(color).size(16.0))
}

pub fn get_device_button(device_name: &str) -> Button {
    let device_text = RichText::new(device_name)
        .color(Color32::WHITE)
        .size(20.0);

    Button::new(device_text)
        .fill(Color32::BLUE)
        .rounding(Rounding::same(8.0))
        .selected(false)
}

pub fn get_disconnect_device_button() -> Button<'static> {
    let text = RichText::new("DC")
        .color(Color32::RED)
        .background_color(Color32::WHITE)
        .size(20.0);

    Button::new(text)
        .fill(Color32::BLUE)
        .rounding(Rounding::same(8.0))
}

pub fn get_session_button(text: &str) -> Button {
    Button::new(RichText::new(text).size(18.0)).rounding(Rounding::same(8.0))
}

pub fn get_timer_label(timer: &str) -> Label {
    Label::new(RichText::new(timer).monospace().size(48.0))
}

/// Alpha and theta lines over the sample window, 0..100 on the y axis.
pub fn draw_chart(ui: &mut Ui, chart: &ChartData) {
    let (response, painter) = ui.allocate_painter(vec2(ui.available_width(), CHART_HEIGHT), Sense::hover());
    let rect = response.rect;
    painter.rect_stroke(rect, 4.0, Stroke::new(1.0, Color32::DARK_GRAY));

    let count = chart.labels.len();
    if count < 2 {
        return;
    }

    let to_point = |i: usize, value: f64| {
        let x = rect.left() + rect.width() * i as f32 / (count - 1) as f32;
        let y = rect.bottom() - rect.height() * (value.clamp(0.0, CHART_MAX) / CHART_MAX) as f32;
        pos2(x, y)
    };

    for (series, color) in [(&chart.alpha, ALPHA_COLOR), (&chart.theta, THETA_COLOR)] {
        let points = series.iter().enumerate().map(|(i, v)| to_point(i, *v)).collect();
        painter.add(Shape::line(points, Stroke::new(2.0, color)));
    }

    let font = FontId::monospace(10.0);
    if let (Some(first), Some(last)) = (chart.labels.first(), chart.labels.last()) {
        painter.text(rect.left_bottom(), Align2::LEFT_BOTTOM, first, font.clone(), Color32::GRAY);
        painter.text(rect.right_bottom(), Align2::RIGHT_BOTTOM, last, font.clone(), Color32::GRAY);
    }
    painter.text(rect.left_top(), Align2::LEFT_TOP, "Alpha Waves", font.clone(), ALPHA_COLOR);
    painter.text(rect.left_top() + vec2(0.0, 12.0), Align2::LEFT_TOP, "Theta Waves", font, THETA_COLOR);
}
