use crate::types::ShortString;
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use uuid::Uuid;

/// Prefix of the names given to queues declared with an empty name.
///
/// The broker reserves the `amq.` namespace, so client-side names live elsewhere.
pub const QUEUE_NAME_PREFIX: &str = "amqp-channels.gen-";

/// Prefix of the tags given to consumers started without an explicit tag.
pub const CONSUMER_TAG_PREFIX: &str = "amqp-channels.ctag-";

/// Source of unique names for anonymous resources.
///
/// Names are generated client-side before the declaration is sent, and are
/// reused as-is when the declaration gets replayed after a connection loss.
pub trait NameGenerator: fmt::Debug + Send + Sync {
    fn generate(&self, prefix: &str) -> ShortString;
}

/// Random session id plus a monotonic counter.
pub struct DefaultNameGenerator {
    session: Uuid,
    counter: AtomicU64,
}

impl DefaultNameGenerator {
    pub fn new() -> Self {
        Self {
            session: Uuid::new_v4(),
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for DefaultNameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl NameGenerator for DefaultNameGenerator {
    fn generate(&self, prefix: &str) -> ShortString {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}{}-{}", prefix, self.session.simple(), n).into()
    }
}

impl fmt::Debug for DefaultNameGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultNameGenerator")
            .field("session", &self.session)
            .field("counter", &self.counter.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc, thread};

    #[test]
    fn names_carry_the_prefix() {
        let generator = DefaultNameGenerator::new();
        let name = generator.generate(QUEUE_NAME_PREFIX);
        assert!(name.as_str().starts_with(QUEUE_NAME_PREFIX));
        assert!(name.as_str().ends_with("-1"));
        assert!(!name.as_str().starts_with("amq."));
    }

    #[test]
    fn generators_do_not_collide() {
        let left = DefaultNameGenerator::new();
        let right = DefaultNameGenerator::new();
        assert_ne!(
            left.generate(CONSUMER_TAG_PREFIX),
            right.generate(CONSUMER_TAG_PREFIX)
        );
    }

    #[test]
    fn unique_across_threads() {
        let generator = Arc::new(DefaultNameGenerator::new());
        let handles = (0..4)
            .map(|_| {
                let generator = generator.clone();
                thread::spawn(move || {
                    (0..250)
                        .map(|_| generator.generate(QUEUE_NAME_PREFIX))
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();
        let names = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect::<HashSet<_>>();
        assert_eq!(names.len(), 1000);
    }
}
