use std::time::{SystemTime, UNIX_EPOCH};

use crate::store::TranslationEntry;

/// Chooses which of `len` candidates to show as reference examples.
pub trait Sampler {
    /// Returns at most `limit` distinct indices below `len`.
    fn pick(&mut self, len: usize, limit: usize) -> Vec<usize>;
}

/// Uniform sampling without replacement (partial Fisher-Yates over a
/// xorshift64* stream).
#[derive(Debug, Clone)]
pub struct RandomSampler {
    state: u64,
}

impl RandomSampler {
    pub fn new() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        Self::with_seed(nanos ^ u64::from(std::process::id()))
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

impl Default for RandomSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for RandomSampler {
    fn pick(&mut self, len: usize, limit: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..len).collect();
        let take = limit.min(len);
        for slot in 0..take {
            let span = (len - slot) as u64;
            let chosen = slot + (self.next() % span) as usize;
            indices.swap(slot, chosen);
        }
        indices.truncate(take);
        indices
    }
}

/// Takes candidates in store order.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedSampler;

impl Sampler for OrderedSampler {
    fn pick(&mut self, len: usize, limit: usize) -> Vec<usize> {
        (0..len.min(limit)).collect()
    }
}

/// Few-shot block of `source: translation` lines drawn from entries that
/// already have a translation for `locale`. Empty when nothing qualifies.
pub fn reference_block(
    entries: &[TranslationEntry],
    locale: &str,
    limit: usize,
    sampler: &mut dyn Sampler,
) -> String {
    let pairs: Vec<(&str, &str)> = entries
        .iter()
        .filter_map(|entry| {
            entry
                .record(locale)
                .filter(|record| record.is_translated())
                .map(|record| (entry.raw.as_str(), record.text.as_str()))
        })
        .collect();
    if pairs.is_empty() || limit == 0 {
        return String::new();
    }
    sampler
        .pick(pairs.len(), limit)
        .into_iter()
        .filter_map(|index| pairs.get(index))
        .map(|(raw, text)| format!("{}: {}", raw, text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::entry;
    use std::collections::HashSet;

    #[test]
    fn only_translated_entries_for_the_locale_are_used() {
        let entries = vec![
            entry("おはよう", &[("zh-CN", "早上好")]),
            entry("こんばんは", &[("zh-CN", "  ")]),
            entry("さようなら", &[("en", "goodbye")]),
            entry("ありがとう", &[("zh-CN", "谢谢")]),
        ];
        let block = reference_block(&entries, "zh-CN", 40, &mut OrderedSampler);
        assert_eq!(block, "おはよう: 早上好\nありがとう: 谢谢");
    }

    #[test]
    fn limit_caps_the_number_of_lines() {
        let entries: Vec<_> = (0..10)
            .map(|i| entry(&format!("文{}", i), &[("en", "text")]))
            .collect();
        let block = reference_block(&entries, "en", 3, &mut RandomSampler::with_seed(7));
        assert_eq!(block.lines().count(), 3);
        assert!(reference_block(&entries, "en", 0, &mut OrderedSampler).is_empty());
    }

    #[test]
    fn nothing_translated_gives_empty_block() {
        let entries = vec![entry("一", &[("zh-CN", "")])];
        assert!(reference_block(&entries, "zh-CN", 40, &mut OrderedSampler).is_empty());
    }

    #[test]
    fn random_sampler_picks_distinct_indices_in_range() {
        let mut sampler = RandomSampler::with_seed(42);
        for _ in 0..20 {
            let picked = sampler.pick(15, 6);
            assert_eq!(picked.len(), 6);
            assert!(picked.iter().all(|index| *index < 15));
            let unique: HashSet<_> = picked.iter().collect();
            assert_eq!(unique.len(), 6);
        }
        assert_eq!(sampler.pick(3, 10).len(), 3);
        assert!(sampler.pick(0, 10).is_empty());
    }

    #[test]
    fn seeded_sampler_is_reproducible() {
        let first = RandomSampler::with_seed(99).pick(50, 10);
        let second = RandomSampler::with_seed(99).pick(50, 10);
        assert_eq!(first, second);
    }
}
