use crate::media::{MediaItem, MediaKind};

const MIB: u64 = 1024 * 1024;

/// Transport limits the batcher packs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryLimits {
    pub max_group_size: usize,
    /// Cumulative size ceiling for one group send.
    pub max_batch_bytes: u64,
    /// Hard ceiling for any single file; larger items are never sent.
    pub max_single_file_bytes: u64,
}

impl Default for DeliveryLimits {
    fn default() -> Self {
        Self {
            max_group_size: 10,
            max_batch_bytes: 45 * MIB,
            max_single_file_bytes: 50 * MIB,
        }
    }
}

/// Items sent together in one group call. The caption belongs to the first item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub items: Vec<MediaItem>,
    pub caption: Option<String>,
}

impl Batch {
    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(|i| i.size_bytes).sum()
    }
}

/// One unit of work for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sendable {
    Batch(Batch),
    Single {
        item: MediaItem,
        caption: Option<String>,
    },
}

impl Sendable {
    pub fn items(&self) -> &[MediaItem] {
        match self {
            Sendable::Batch(batch) => &batch.items,
            Sendable::Single { item, .. } => std::slice::from_ref(item),
        }
    }

    pub fn caption(&self) -> Option<&str> {
        match self {
            Sendable::Batch(batch) => batch.caption.as_deref(),
            Sendable::Single { caption, .. } => caption.as_deref(),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Sendable::Batch(batch) => format!("group of {}", batch.items.len()),
            Sendable::Single { item, .. } => format!("{} {}", item.kind, item.file_name()),
        }
    }
}

/// Output of [`make_batches`]: ordered sends plus the items that can never be sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    pub sends: Vec<Sendable>,
    pub skipped: Vec<MediaItem>,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.sends.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.sends.iter().map(|s| s.items().len()).sum()
    }
}

/// Greedy single pass that packs items into groups without reordering them.
///
/// Items above the hard ceiling are skipped. Audio and items above the batch
/// byte limit go out on their own, flushing whatever group was accumulating.
/// Sizes compare with strict `>`, so a group may land exactly on the limit.
pub fn make_batches(
    items: Vec<MediaItem>,
    limits: &DeliveryLimits,
    caption: Option<String>,
) -> BatchPlan {
    let mut plan = BatchPlan::default();
    let mut caption = caption;
    let mut current: Vec<MediaItem> = Vec::new();
    let mut current_bytes: u64 = 0;

    for item in items {
        if item.size_bytes > limits.max_single_file_bytes {
            log::warn!(
                "Skipping {}: {:.2} MB exceeds the {:.2} MB file limit",
                item.path.display(),
                item.size_bytes as f64 / MIB as f64,
                limits.max_single_file_bytes as f64 / MIB as f64
            );
            plan.skipped.push(item);
            continue;
        }

        if item.kind == MediaKind::Audio || item.size_bytes > limits.max_batch_bytes {
            flush(&mut plan, &mut current, &mut current_bytes, &mut caption);
            plan.sends.push(Sendable::Single {
                item,
                caption: caption.take(),
            });
            continue;
        }

        let would_overflow = current_bytes + item.size_bytes > limits.max_batch_bytes;
        if !current.is_empty() && (would_overflow || current.len() >= limits.max_group_size) {
            flush(&mut plan, &mut current, &mut current_bytes, &mut caption);
        }

        current_bytes += item.size_bytes;
        current.push(item);
    }

    flush(&mut plan, &mut current, &mut current_bytes, &mut caption);

    log::debug!(
        "Planned {} send(s) for {} item(s), {} skipped",
        plan.sends.len(),
        plan.item_count(),
        plan.skipped.len()
    );

    plan
}

fn flush(
    plan: &mut BatchPlan,
    current: &mut Vec<MediaItem>,
    current_bytes: &mut u64,
    caption: &mut Option<String>,
) {
    if current.is_empty() {
        return;
    }

    plan.sends.push(Sendable::Batch(Batch {
        items: std::mem::take(current),
        caption: caption.take(),
    }));
    *current_bytes = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn item(name: &str, kind: MediaKind, size_bytes: u64) -> MediaItem {
        MediaItem {
            path: PathBuf::from(format!("/downloads/session/{}", name)),
            kind,
            size_bytes,
            thumbnail_path: None,
        }
    }

    fn photos(count: usize, size: u64) -> Vec<MediaItem> {
        (0..count)
            .map(|i| item(&format!("{:02}.jpg", i), MediaKind::Photo, size))
            .collect()
    }

    fn captioned_sends(plan: &BatchPlan) -> Vec<usize> {
        plan.sends
            .iter()
            .enumerate()
            .filter(|(_, s)| s.caption().is_some())
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn test_twelve_photos_split_into_ten_and_two() {
        let plan = make_batches(
            photos(12, 3 * MIB),
            &DeliveryLimits::default(),
            Some("Stories".to_string()),
        );

        assert_eq!(plan.sends.len(), 2);
        let Sendable::Batch(first) = &plan.sends[0] else {
            panic!("expected a batch");
        };
        let Sendable::Batch(second) = &plan.sends[1] else {
            panic!("expected a batch");
        };
        assert_eq!(first.items.len(), 10);
        assert_eq!(first.total_bytes(), 30 * MIB);
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.total_bytes(), 6 * MIB);

        assert_eq!(first.caption.as_deref(), Some("Stories"));
        assert!(second.caption.is_none());
        assert_eq!(first.items[0].file_name(), "00.jpg");
    }

    #[test]
    fn test_oversized_item_is_skipped() {
        let plan = make_batches(
            vec![item("big.mp4", MediaKind::Video, 60 * MIB)],
            &DeliveryLimits::default(),
            Some("caption".to_string()),
        );

        assert!(plan.is_empty());
        assert_eq!(plan.skipped.len(), 1);
    }

    #[test]
    fn test_greedy_order_is_input_order() {
        let mut items = vec![item("a.mp4", MediaKind::Video, 40 * MIB)];
        items.extend(photos(9, MIB));

        let plan = make_batches(items, &DeliveryLimits::default(), None);

        // 40 + 1 + 1 + 1 + 1 + 1 = 45, the sixth photo would make 46
        assert_eq!(plan.sends.len(), 2);
        let sizes: Vec<usize> = plan.sends.iter().map(|s| s.items().len()).collect();
        assert_eq!(sizes, vec![6, 4]);
        assert_eq!(plan.sends[0].items()[0].file_name(), "a.mp4");
        assert_eq!(plan.sends[1].items()[0].file_name(), "05.jpg");
    }

    #[test]
    fn test_exact_limit_stays_in_one_batch() {
        let limits = DeliveryLimits {
            max_group_size: 10,
            max_batch_bytes: 10,
            max_single_file_bytes: 20,
        };
        let items = vec![
            item("a.jpg", MediaKind::Photo, 4),
            item("b.jpg", MediaKind::Photo, 6),
            item("c.jpg", MediaKind::Photo, 1),
        ];

        let plan = make_batches(items, &limits, None);
        let sizes: Vec<usize> = plan.sends.iter().map(|s| s.items().len()).collect();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[test]
    fn test_item_between_batch_limit_and_ceiling_goes_alone() {
        let items = vec![
            item("a.jpg", MediaKind::Photo, MIB),
            item("b.mp4", MediaKind::Video, 47 * MIB),
            item("c.jpg", MediaKind::Photo, MIB),
        ];

        let plan = make_batches(items, &DeliveryLimits::default(), Some("x".into()));

        assert_eq!(plan.sends.len(), 3);
        assert!(matches!(plan.sends[0], Sendable::Batch(_)));
        assert!(matches!(plan.sends[1], Sendable::Single { .. }));
        assert!(matches!(plan.sends[2], Sendable::Batch(_)));
        assert_eq!(captioned_sends(&plan), vec![0]);
    }

    #[test]
    fn test_audio_is_never_grouped() {
        let items = vec![
            item("1.mp3", MediaKind::Audio, MIB),
            item("2.mp3", MediaKind::Audio, MIB),
            item("3.mp3", MediaKind::Audio, MIB),
        ];

        let plan = make_batches(items, &DeliveryLimits::default(), Some("Tracks".into()));

        assert_eq!(plan.sends.len(), 3);
        assert!(plan
            .sends
            .iter()
            .all(|s| matches!(s, Sendable::Single { item, .. } if item.kind == MediaKind::Audio)));
        let names: Vec<String> = plan.sends.iter().map(|s| s.items()[0].file_name()).collect();
        assert_eq!(names, vec!["1.mp3", "2.mp3", "3.mp3"]);
        assert_eq!(captioned_sends(&plan), vec![0]);
    }

    #[test]
    fn test_caption_skips_leading_skipped_items() {
        let items = vec![
            item("huge.mp4", MediaKind::Video, 70 * MIB),
            item("ok.jpg", MediaKind::Photo, MIB),
        ];

        let plan = make_batches(items, &DeliveryLimits::default(), Some("hi".into()));

        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.sends[0].caption(), Some("hi"));
    }

    #[test]
    fn test_every_item_accounted_for_and_limits_hold() {
        let limits = DeliveryLimits {
            max_group_size: 4,
            max_batch_bytes: 100,
            max_single_file_bytes: 150,
        };
        let kinds = [MediaKind::Photo, MediaKind::Video, MediaKind::Audio];

        for seed in 0u64..25 {
            let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            let mut next = || {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                state >> 33
            };

            let len = (next() % 30) as usize;
            let items: Vec<MediaItem> = (0..len)
                .map(|i| {
                    let kind = kinds[(next() % 3) as usize];
                    item(&format!("{:03}", i), kind, next() % 180)
                })
                .collect();

            let plan = make_batches(items.clone(), &limits, Some("c".into()));

            assert_eq!(plan.item_count() + plan.skipped.len(), items.len());
            for send in &plan.sends {
                if let Sendable::Batch(batch) = send {
                    assert!(!batch.items.is_empty());
                    assert!(batch.items.len() <= limits.max_group_size);
                    assert!(batch.total_bytes() <= limits.max_batch_bytes);
                    assert!(batch.items.iter().all(|i| i.kind != MediaKind::Audio));
                }
            }

            let delivered: Vec<&MediaItem> =
                plan.sends.iter().flat_map(|s| s.items().iter()).collect();
            let expected: Vec<&MediaItem> = items
                .iter()
                .filter(|i| i.size_bytes <= limits.max_single_file_bytes)
                .collect();
            assert_eq!(delivered, expected);

            let captions = plan.sends.iter().filter(|s| s.caption().is_some()).count();
            assert_eq!(captions, usize::from(!plan.sends.is_empty()));
        }
    }
}
