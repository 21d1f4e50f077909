use std::collections::VecDeque;
use std::future;
use std::time::Duration;

use chrono::{DateTime, Local};
use rand::Rng;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::sink::ChartSink;


pub const WINDOW_CAPACITY: usize = 30;
const SAMPLE_PERIOD: Duration = Duration::from_secs(1);
const SAMPLE_MAX: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Local>,
    pub alpha: f64,
    pub theta: f64,
}

impl Sample {
    pub fn label(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}

/// Fixed-capacity FIFO of the most recent samples, oldest first.
#[derive(Debug, Clone, Default)]
pub struct SampleWindow {
    samples: VecDeque<Sample>,
}

impl SampleWindow {
    pub fn push(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        while self.samples.len() > WINDOW_CAPACITY {
            self.samples.pop_front();
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn chart(&self) -> ChartData {
        ChartData {
            labels: self.samples.iter().map(Sample::label).collect(),
            alpha: self.samples.iter().map(|s| s.alpha).collect(),
            theta: self.samples.iter().map(|s| s.theta).collect(),
        }
    }
}

/// What the chart widget redraws from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub alpha: Vec<f64>,
    pub theta: Vec<f64>,
}

/// Synthetic alpha/theta samples at 1 Hz while active.
pub struct SampleFeed {
    window: SampleWindow,
    interval: Option<Interval>,
    sink: Box<dyn ChartSink>,
}

impl SampleFeed {
    pub fn new(sink: Box<dyn ChartSink>) -> Self {
        SampleFeed {
            window: SampleWindow::default(),
            interval: None,
            sink,
        }
    }

    #[cfg(test)]
    pub fn window(&self) -> &SampleWindow {
        &self.window
    }

    pub fn is_active(&self) -> bool {
        self.interval.is_some()
    }

    pub fn start(&mut self) {
        let mut interval = time::interval_at(Instant::now() + SAMPLE_PERIOD, SAMPLE_PERIOD);
        // A late tick shouldn't turn into a burst of identical timestamps
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
    }

    pub fn stop(&mut self) {
        self.interval = None;
    }

    pub async fn next_tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => future::pending().await,
        }
    }

    pub fn on_tick(&mut self) {
        if !self.is_active() {
            return;
        }
        let mut rng = rand::thread_rng();
        self.window.push(Sample {
            timestamp: Local::now(),
            alpha: rng.gen_range(0.0..SAMPLE_MAX),
            theta: rng.gen_range(0.0..SAMPLE_MAX),
        });
        self.sink.redraw(self.window.chart());
    }
}
