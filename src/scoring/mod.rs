//! Realtime Scoring
//!
//! Fuses the DSP components into per-chunk similarity scores and derived
//! practice feedback:
//!
//! ```text
//! RealtimeScorer (orchestrator)
//!     ├─► DtwComparator        (mfcc + timing components)
//!     ├─► loudness alignment   (volume component)
//!     ├─► ScoreHistory         (ring, peak, trend)
//!     └─► feedback             (quality buckets, recommendation text)
//! ```

mod feedback;
mod history;
mod scorer;

pub use feedback::{quality_assessment, recommendation};
pub use history::ScoreHistory;
pub use scorer::{RealtimeScorer, ScoreInputs, ScorerState};
