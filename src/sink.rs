use tokio::sync::mpsc::UnboundedSender;

use crate::device::LinkStatus;
use crate::feed::ChartData;
use crate::measurement::{DashboardMetrics, Metric};
use crate::session::SessionStatus;
use crate::signal::CoreSignal;


pub trait DashboardSink {
    fn show_status(&mut self, status: LinkStatus, text: String);
    fn show_devices(&mut self, names: Vec<String>);
    fn show_metric(&mut self, metric: Metric, text: String);
    /// User-facing failure notice.
    fn show_notice(&mut self, text: String);
}

pub trait SessionSink {
    fn show_timer(&mut self, text: String);
    fn show_session(&mut self, status: SessionStatus);
}

pub trait ChartSink {
    fn redraw(&mut self, chart: ChartData);
}

pub fn update_dashboard(sink: &mut dyn DashboardSink, metrics: DashboardMetrics) {
    for (metric, text) in metrics.formatted() {
        sink.show_metric(metric, text);
    }
}

/// Anything that can carry a `CoreSignal` gets all three sinks.
pub trait Emit {
    fn emit(&mut self, signal: CoreSignal);
}

impl<T: Emit> DashboardSink for T {
    fn show_status(&mut self, status: LinkStatus, text: String) {
        self.emit(CoreSignal::LinkStatus { status, text });
    }

    fn show_devices(&mut self, names: Vec<String>) {
        self.emit(CoreSignal::DiscoveredPeripherals(names));
    }

    fn show_metric(&mut self, metric: Metric, text: String) {
        self.emit(CoreSignal::Metric(metric, text));
    }

    fn show_notice(&mut self, text: String) {
        self.emit(CoreSignal::Notice(text));
    }
}

impl<T: Emit> SessionSink for T {
    fn show_timer(&mut self, text: String) {
        self.emit(CoreSignal::Timer(text));
    }

    fn show_session(&mut self, status: SessionStatus) {
        self.emit(CoreSignal::Session(status));
    }
}

impl<T: Emit> ChartSink for T {
    fn redraw(&mut self, chart: ChartData) {
        self.emit(CoreSignal::Chart(chart));
    }
}

/// Forwards everything to the GUI thread.
#[derive(Clone)]
pub struct GuiSink {
    tx_to_gui: UnboundedSender<CoreSignal>,
}

impl GuiSink {
    pub fn new(tx_to_gui: UnboundedSender<CoreSignal>) -> Self {
        GuiSink { tx_to_gui }
    }
}

impl Emit for GuiSink {
    fn emit(&mut self, signal: CoreSignal) {
        // GUI already gone means we're shutting down
        let _ = self.tx_to_gui.send(signal);
    }
}
