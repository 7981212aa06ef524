//! Recorded result of one evaluation

use crate::key::{ChildId, Key, Resolved};

/// Output plus the declarations that produced it
#[derive(Clone, Debug)]
pub(crate) struct Frame<O> {
    pub output: O,
    pub actions: Vec<Resolved<Key>>,
    pub children: Vec<ChildId>,
    /// Generation of the node when this frame was produced
    pub generation: u64,
}

impl<O: PartialEq> Frame<O> {
    /// Describe how `other` differs from this frame, if it does
    pub fn diff(&self, other: &Frame<O>) -> Option<String> {
        if self.output != other.output {
            return Some("output differs between identical evaluations".to_string());
        }
        if self.children != other.children {
            return Some(format!(
                "declared children differ: {} vs {}",
                list(&self.children),
                list(&other.children)
            ));
        }
        if self.actions != other.actions {
            return Some(format!(
                "declared actions differ: {} vs {}",
                list(&self.actions),
                list(&other.actions)
            ));
        }
        None
    }
}

fn list<T: std::fmt::Display>(items: &[T]) -> String {
    let items: Vec<String> = items.iter().map(ToString::to_string).collect();
    format!("[{}]", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(output: i32, actions: &[&'static str]) -> Frame<i32> {
        Frame {
            output,
            actions: actions
                .iter()
                .map(|a| Resolved::new(Key::from(*a), 0))
                .collect(),
            children: Vec::new(),
            generation: 1,
        }
    }

    #[test]
    fn test_identical_frames_have_no_diff() {
        assert!(frame(1, &["poll"]).diff(&frame(1, &["poll"])).is_none());
    }

    #[test]
    fn test_generation_is_not_part_of_diff() {
        let mut later = frame(1, &["poll"]);
        later.generation = 2;
        assert!(frame(1, &["poll"]).diff(&later).is_none());
    }

    #[test]
    fn test_diff_names_what_changed() {
        let diff = frame(1, &[]).diff(&frame(2, &[])).unwrap();
        assert!(diff.contains("output"));

        let diff = frame(1, &["poll"]).diff(&frame(1, &["push"])).unwrap();
        assert_eq!(diff, "declared actions differ: [poll] vs [push]");
    }
}
