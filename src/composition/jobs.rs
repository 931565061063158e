//! Immutable job descriptions handed to the engine.

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::filters::FilterKind;
use crate::media::types::{MediaClip, SpeedFactor, TimeRange};

/// One trim/speed/filter job over a single clip
#[derive(Debug, Clone)]
pub struct ProcessingRequest {
    pub clip: MediaClip,
    pub range: TimeRange,
    pub speed: SpeedFactor,
    pub filter: FilterKind,
    pub mute_audio: bool,
}

impl ProcessingRequest {
    /// Unfiltered, normal-speed request keeping the audio
    pub fn new(clip: MediaClip, range: TimeRange) -> Self {
        Self {
            clip,
            range,
            speed: SpeedFactor::Normal,
            filter: FilterKind::None,
            mute_audio: false,
        }
    }

    pub fn with_speed(mut self, speed: SpeedFactor) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_filter(mut self, filter: FilterKind) -> Self {
        self.filter = filter;
        self
    }

    pub fn muted(mut self, mute_audio: bool) -> Self {
        self.mute_audio = mute_audio;
        self
    }

    /// Re-check the range against this request's clip
    pub fn validate(&self) -> Result<(), ValidationError> {
        TimeRange::within(&self.clip, self.range.start(), self.range.end()).map(|_| ())
    }
}

/// A clip and its 1-based position in a merge
#[derive(Debug, Clone)]
pub struct MergeEntry {
    pub clip: MediaClip,
    pub order: u32,
}

impl MergeEntry {
    pub fn new(clip: MediaClip, order: u32) -> Self {
        Self { clip, order }
    }
}

/// Clips to concatenate, positioned by their order values rather than by
/// their position in `entries`
#[derive(Debug, Clone, Default)]
pub struct MergeJob {
    pub entries: Vec<MergeEntry>,
}

/// Check that `orders` is exactly a permutation of `1..=N`
pub fn check_unique_orders<I>(orders: I) -> Result<(), ValidationError>
where
    I: IntoIterator<Item = u32>,
{
    let orders: Vec<u32> = orders.into_iter().collect();
    let count = orders.len();
    let mut seen = HashSet::with_capacity(count);

    for &order in &orders {
        if !seen.insert(order) {
            return Err(ValidationError::DuplicateOrder { order });
        }
    }
    if let Some(&order) = orders.iter().find(|&&o| o == 0 || o as usize > count) {
        return Err(ValidationError::OrderOutOfRange { order, count });
    }
    Ok(())
}

impl MergeJob {
    pub fn new(entries: Vec<MergeEntry>) -> Self {
        Self { entries }
    }

    pub fn validate(&self, max_clips: usize) -> Result<(), ValidationError> {
        if self.entries.is_empty() {
            return Err(ValidationError::EmptyMerge);
        }
        if self.entries.len() > max_clips {
            return Err(ValidationError::TooManyClips {
                count: self.entries.len(),
                max: max_clips,
            });
        }
        check_unique_orders(self.entries.iter().map(|e| e.order))
    }

    /// Clips sorted by their order value
    pub fn ordered_clips(&self) -> Vec<MediaClip> {
        let mut entries: Vec<&MergeEntry> = self.entries.iter().collect();
        entries.sort_by_key(|e| e.order);
        entries.into_iter().map(|e| e.clip.clone()).collect()
    }
}

/// Shortest recurring interval, in seconds; raised to one main-clip frame for very low rates
pub const MIN_RECURRING_INTERVAL: f64 = 1.0;

/// Most ads a recurring placement may insert
pub const MAX_RECURRING_ADS: usize = 100;

/// Where the ad goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdPlacement {
    /// A single ad after `insert_after_seconds`
    #[default]
    Once,
    /// An ad after every `insert_after_seconds` of main content
    Recurring,
}

/// Splice an ad into a main clip
#[derive(Debug, Clone)]
pub struct AdInsertionJob {
    pub main_clip: MediaClip,
    pub ad_clip: MediaClip,
    pub insert_after_seconds: f64,
    /// None plays the whole ad
    pub ad_duration_seconds: Option<f64>,
    pub placement: AdPlacement,
}

/// Concrete cut points derived from an `AdInsertionJob`
#[derive(Debug, Clone, PartialEq)]
pub struct SplicePlan {
    /// Main-clip times an ad is inserted at, ascending, strictly inside the clip
    pub boundaries: Vec<f64>,
    pub ad_duration: f64,
    pub main_duration: f64,
}

impl SplicePlan {
    /// Main-clip segments between boundaries; the last one runs to the end
    pub fn main_segments(&self) -> Vec<(f64, f64)> {
        let mut cuts = Vec::with_capacity(self.boundaries.len() + 2);
        cuts.push(0.0);
        cuts.extend(self.boundaries.iter().copied());
        cuts.push(self.main_duration);
        cuts.windows(2).map(|w| (w[0], w[1])).collect()
    }

    pub fn ad_count(&self) -> usize {
        self.boundaries.len()
    }

    pub fn expected_duration(&self) -> f64 {
        self.main_duration + self.ad_duration * self.ad_count() as f64
    }
}

impl AdInsertionJob {
    pub fn new(main_clip: MediaClip, ad_clip: MediaClip, insert_after_seconds: f64) -> Self {
        Self {
            main_clip,
            ad_clip,
            insert_after_seconds,
            ad_duration_seconds: None,
            placement: AdPlacement::Once,
        }
    }

    pub fn with_ad_duration(mut self, seconds: f64) -> Self {
        self.ad_duration_seconds = Some(seconds);
        self
    }

    pub fn with_placement(mut self, placement: AdPlacement) -> Self {
        self.placement = placement;
        self
    }

    /// Validate the parameters and work out every cut
    pub fn plan(&self) -> Result<SplicePlan, ValidationError> {
        let main_duration = self.main_clip.duration_seconds();
        let at = self.insert_after_seconds;
        if !(at.is_finite() && at > 0.0 && at < main_duration) {
            return Err(ValidationError::InvalidInsertPoint {
                at,
                duration: main_duration,
            });
        }

        let available = self.ad_clip.duration_seconds();
        let ad_duration = self.ad_duration_seconds.unwrap_or(available);
        if !(ad_duration.is_finite() && ad_duration > 0.0 && ad_duration <= available) {
            return Err(ValidationError::InvalidAdDuration {
                requested: ad_duration,
                available,
            });
        }

        let boundaries = match self.placement {
            AdPlacement::Once => vec![at],
            AdPlacement::Recurring => {
                let min = MIN_RECURRING_INTERVAL.max(self.main_clip.frame_rate().frame_interval());
                if at < min {
                    return Err(ValidationError::AdIntervalTooShort { at, min });
                }
                let boundaries: Vec<f64> = (1..)
                    .map(|k| k as f64 * at)
                    .take_while(|&t| t < main_duration)
                    .take(MAX_RECURRING_ADS + 1)
                    .collect();
                if boundaries.len() > MAX_RECURRING_ADS {
                    return Err(ValidationError::TooManyAds {
                        count: ((main_duration / at).ceil() as usize).saturating_sub(1),
                        max: MAX_RECURRING_ADS,
                    });
                }
                boundaries
            }
        };

        Ok(SplicePlan {
            boundaries,
            ad_duration,
            main_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::types::{FrameRate, Resolution};

    fn clip(name: &str, duration: f64) -> MediaClip {
        MediaClip::new(name, duration, FrameRate::new(30, 1).unwrap(), Resolution::new(640, 360), "h264")
    }

    #[test]
    fn test_unique_orders() {
        assert!(check_unique_orders([2, 1, 3]).is_ok());
        assert!(check_unique_orders([1]).is_ok());
        assert_eq!(
            check_unique_orders([1, 2, 2]),
            Err(ValidationError::DuplicateOrder { order: 2 })
        );
        assert_eq!(
            check_unique_orders([1, 3]),
            Err(ValidationError::OrderOutOfRange { order: 3, count: 2 })
        );
        assert!(check_unique_orders([0, 1]).is_err());
    }

    #[test]
    fn test_merge_job_limits_and_ordering() {
        let job = MergeJob::new(vec![
            MergeEntry::new(clip("c2.mp4", 1.0), 1),
            MergeEntry::new(clip("c1.mp4", 1.0), 2),
            MergeEntry::new(clip("c3.mp4", 1.0), 3),
        ]);
        assert!(job.validate(6).is_ok());
        assert_eq!(job.validate(2), Err(ValidationError::TooManyClips { count: 3, max: 2 }));
        assert_eq!(MergeJob::default().validate(6), Err(ValidationError::EmptyMerge));

        let shuffled = MergeJob::new(vec![
            MergeEntry::new(clip("c3.mp4", 1.0), 3),
            MergeEntry::new(clip("c1.mp4", 1.0), 2),
            MergeEntry::new(clip("c2.mp4", 1.0), 1),
        ]);
        let names: Vec<String> = shuffled.ordered_clips().iter().map(|c| c.name()).collect();
        assert_eq!(names, ["c2.mp4", "c1.mp4", "c3.mp4"]);
    }

    #[test]
    fn test_single_insertion_plan() {
        let job = AdInsertionJob::new(clip("main.mp4", 20.0), clip("ad.mp4", 8.0), 10.0).with_ad_duration(5.0);
        let plan = job.plan().unwrap();

        assert_eq!(plan.boundaries, vec![10.0]);
        assert_eq!(plan.main_segments(), vec![(0.0, 10.0), (10.0, 20.0)]);
        assert_eq!(plan.expected_duration(), 25.0);
    }

    #[test]
    fn test_full_ad_length_by_default() {
        let job = AdInsertionJob::new(clip("main.mp4", 20.0), clip("ad.mp4", 8.0), 10.0);
        assert_eq!(job.plan().unwrap().ad_duration, 8.0);
    }

    #[test]
    fn test_recurring_plan() {
        let job = AdInsertionJob::new(clip("main.mp4", 25.0), clip("ad.mp4", 3.0), 10.0)
            .with_placement(AdPlacement::Recurring);
        let plan = job.plan().unwrap();

        assert_eq!(plan.boundaries, vec![10.0, 20.0]);
        assert_eq!(plan.ad_count(), 2);
        assert_eq!(plan.main_segments().last(), Some(&(20.0, 25.0)));
    }

    #[test]
    fn test_recurring_interval_must_be_usable() {
        let job = AdInsertionJob::new(clip("main.mp4", 20.0), clip("ad.mp4", 5.0), 0.001)
            .with_placement(AdPlacement::Recurring);
        assert_eq!(
            job.plan().unwrap_err(),
            ValidationError::AdIntervalTooShort { at: 0.001, min: 1.0 }
        );

        // a one-off insert at the same point is fine
        let once = AdInsertionJob::new(clip("main.mp4", 20.0), clip("ad.mp4", 5.0), 0.001);
        assert_eq!(once.plan().unwrap().ad_count(), 1);
    }

    #[test]
    fn test_recurring_ad_count_is_capped() {
        let job = AdInsertionJob::new(clip("main.mp4", 200.0), clip("ad.mp4", 1.0), 1.5)
            .with_placement(AdPlacement::Recurring);
        assert_eq!(
            job.plan().unwrap_err(),
            ValidationError::TooManyAds {
                count: 133,
                max: MAX_RECURRING_ADS
            }
        );

        let job = AdInsertionJob::new(clip("main.mp4", 100.5), clip("ad.mp4", 1.0), 1.0)
            .with_placement(AdPlacement::Recurring);
        assert_eq!(job.plan().unwrap().ad_count(), MAX_RECURRING_ADS);
    }

    #[test]
    fn test_invalid_ad_parameters() {
        let main = clip("main.mp4", 20.0);
        let ad = clip("ad.mp4", 5.0);

        for at in [0.0, -1.0, 20.0, 25.0, f64::NAN] {
            let job = AdInsertionJob::new(main.clone(), ad.clone(), at);
            assert!(matches!(job.plan(), Err(ValidationError::InvalidInsertPoint { .. })), "{at}");
        }
        for duration in [0.0, -2.0, 5.5] {
            let job = AdInsertionJob::new(main.clone(), ad.clone(), 10.0).with_ad_duration(duration);
            assert!(matches!(job.plan(), Err(ValidationError::InvalidAdDuration { .. })), "{duration}");
        }
    }
}
