//! Bounded Score History
//!
//! Ring of recent [`SimilarityScore`]s plus the aggregates derived from
//! it: peak since reset, trending mean over recent reliable scores, and
//! the improving/declining flag.

use std::collections::VecDeque;

use crate::types::SimilarityScore;

/// Reliable scores averaged for the trend.
const TREND_WINDOW: usize = 10;

pub struct ScoreHistory {
    ring: VecDeque<SimilarityScore>,
    capacity: usize,
    peak: f32,
    trending: f32,
    previous_trending: f32,
}

impl ScoreHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            peak: 0.0,
            trending: 0.0,
            previous_trending: 0.0,
        }
    }

    /// Shrinks eagerly when the new capacity is smaller.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.ring.len() > capacity {
            self.ring.pop_front();
        }
    }

    pub fn push(&mut self, score: SimilarityScore) {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.peak = self.peak.max(score.overall);
        self.ring.push_back(score);

        self.previous_trending = self.trending;
        self.trending = self.compute_trending();
    }

    /// Mean `overall` of the last [`TREND_WINDOW`] reliable scores;
    /// 0.0 until that many exist.
    fn compute_trending(&self) -> f32 {
        let reliable: Vec<f32> = self
            .ring
            .iter()
            .rev()
            .filter(|s| s.is_reliable)
            .take(TREND_WINDOW)
            .map(|s| s.overall)
            .collect();
        if reliable.len() < TREND_WINDOW {
            return 0.0;
        }
        reliable.iter().sum::<f32>() / reliable.len() as f32
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Most recent scores, newest last, capped at `max`.
    pub fn recent(&self, max: usize) -> Vec<SimilarityScore> {
        let take = max.min(self.ring.len());
        self.ring
            .iter()
            .skip(self.ring.len() - take)
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<&SimilarityScore> {
        self.ring.back()
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn trending(&self) -> f32 {
        self.trending
    }

    pub fn is_improving(&self) -> bool {
        self.trending > self.previous_trending
    }

    pub fn reset(&mut self) {
        self.ring.clear();
        self.peak = 0.0;
        self.trending = 0.0;
        self.previous_trending = 0.0;
    }
}
