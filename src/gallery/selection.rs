use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::GalleryImage;

/// How a tap on a gallery cell changes the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// Each tap flips one image; ranks follow tap order.
    #[default]
    Toggle,
    /// A tap at `p` selects exactly the images at `0..=p`, in index order.
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionChange {
    Selected { index: usize, rank: u32 },
    Deselected { index: usize },
    RangeSelected { through: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("gallery index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

pub type SelectionResult<T> = std::result::Result<T, SelectionError>;

/// Gallery list plus per-image selection ranks.
///
/// Rank 0 means unselected. Selected ranks always form `1..=selected_count()`.
#[derive(Debug, Clone)]
pub struct GallerySelection {
    images: Vec<GalleryImage>,
    ranks: Vec<u32>,
    next_rank: u32,
    policy: SelectionPolicy,
}

impl GallerySelection {
    pub fn new(images: Vec<GalleryImage>, policy: SelectionPolicy) -> Self {
        let ranks = vec![0; images.len()];
        Self {
            images,
            ranks,
            next_rank: 1,
            policy,
        }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Switches policy. The current selection is dropped since the two
    /// policies do not share rank semantics.
    pub fn set_policy(&mut self, policy: SelectionPolicy) {
        if self.policy != policy {
            self.policy = policy;
            self.clear();
        }
    }

    pub fn images(&self) -> &[GalleryImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn rank(&self, index: usize) -> Option<u32> {
        self.ranks.get(index).copied()
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.rank(index).is_some_and(|rank| rank > 0)
    }

    pub fn selected_count(&self) -> usize {
        self.ranks.iter().filter(|rank| **rank > 0).count()
    }

    pub fn tap(&mut self, index: usize) -> SelectionResult<SelectionChange> {
        if index >= self.images.len() {
            return Err(SelectionError::IndexOutOfRange {
                index,
                len: self.images.len(),
            });
        }

        let change = match self.policy {
            SelectionPolicy::Toggle => self.toggle(index),
            SelectionPolicy::Range => self.select_through(index),
        };
        tracing::debug!(?change, selected = self.selected_count(), "gallery selection changed");
        Ok(change)
    }

    fn toggle(&mut self, index: usize) -> SelectionChange {
        if self.ranks[index] > 0 {
            self.ranks[index] = 0;
            self.repack();
            SelectionChange::Deselected { index }
        } else {
            let rank = self.next_rank;
            self.ranks[index] = rank;
            self.next_rank = self.next_rank.saturating_add(1);
            SelectionChange::Selected { index, rank }
        }
    }

    fn select_through(&mut self, through: usize) -> SelectionChange {
        self.clear();
        for (position, rank) in self.ranks.iter_mut().enumerate().take(through + 1) {
            *rank = position as u32 + 1;
        }
        self.next_rank = through as u32 + 2;
        SelectionChange::RangeSelected { through }
    }

    fn repack(&mut self) {
        let mut selected = self
            .ranks
            .iter()
            .enumerate()
            .filter(|(_, rank)| **rank > 0)
            .map(|(index, rank)| (*rank, index))
            .collect::<Vec<_>>();
        selected.sort_unstable();

        for (position, (_, index)) in selected.iter().enumerate() {
            self.ranks[*index] = position as u32 + 1;
        }
        self.next_rank = selected.len() as u32 + 1;
    }

    pub fn clear(&mut self) {
        self.ranks.iter_mut().for_each(|rank| *rank = 0);
        self.next_rank = 1;
    }

    /// Selected images sorted ascending by rank.
    pub fn ordered(&self) -> Vec<&GalleryImage> {
        self.ordered_indices()
            .into_iter()
            .map(|index| &self.images[index])
            .collect()
    }

    pub fn into_ordered(self) -> Vec<GalleryImage> {
        let order = self.ordered_indices();
        let mut slots = self.images.into_iter().map(Some).collect::<Vec<_>>();
        order
            .into_iter()
            .filter_map(|index| slots[index].take())
            .collect()
    }

    fn ordered_indices(&self) -> Vec<usize> {
        let mut selected = self
            .ranks
            .iter()
            .enumerate()
            .filter(|(_, rank)| **rank > 0)
            .map(|(index, rank)| (*rank, index))
            .collect::<Vec<_>>();
        selected.sort_unstable();
        selected.into_iter().map(|(_, index)| index).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::SourceRef;

    fn gallery(names: &[&str]) -> Vec<GalleryImage> {
        names
            .iter()
            .enumerate()
            .map(|(index, name)| {
                GalleryImage::new(
                    index as u64 + 1,
                    SourceRef::new(format!("/gallery/{name}.png")),
                    1_700_000_000 - index as u64,
                    *name,
                )
            })
            .collect()
    }

    fn names(images: &[&GalleryImage]) -> Vec<String> {
        images
            .iter()
            .map(|image| image.display_name.clone())
            .collect()
    }

    fn assert_ranks_contiguous(selection: &GallerySelection) {
        let mut ranks = (0..selection.len())
            .filter_map(|index| selection.rank(index))
            .filter(|rank| *rank > 0)
            .collect::<Vec<_>>();
        ranks.sort_unstable();
        let expected = (1..=ranks.len() as u32).collect::<Vec<_>>();
        assert_eq!(ranks, expected);
    }

    #[test]
    fn toggle_mode_orders_by_tap_sequence() {
        let mut selection = GallerySelection::new(gallery(&["A", "B", "C"]), SelectionPolicy::Toggle);
        selection.tap(2).unwrap();
        selection.tap(0).unwrap();
        selection.tap(1).unwrap();

        assert_eq!(names(&selection.ordered()), ["C", "A", "B"]);
        assert_eq!(selection.rank(2), Some(1));
        assert_eq!(selection.rank(0), Some(2));
        assert_eq!(selection.rank(1), Some(3));
    }

    #[test]
    fn toggle_mode_repacks_ranks_after_deselect() {
        let mut selection = GallerySelection::new(gallery(&["A", "B", "C"]), SelectionPolicy::Toggle);
        selection.tap(2).unwrap();
        selection.tap(0).unwrap();
        selection.tap(1).unwrap();

        let change = selection.tap(0).unwrap();
        assert_eq!(change, SelectionChange::Deselected { index: 0 });
        assert_eq!(selection.rank(2), Some(1));
        assert_eq!(selection.rank(1), Some(2));
        assert_eq!(selection.rank(0), Some(0));
        assert_eq!(names(&selection.ordered()), ["C", "B"]);
    }

    #[test]
    fn toggle_mode_continues_numbering_after_repack() {
        let mut selection =
            GallerySelection::new(gallery(&["A", "B", "C", "D"]), SelectionPolicy::Toggle);
        selection.tap(0).unwrap();
        selection.tap(1).unwrap();
        selection.tap(0).unwrap();

        let change = selection.tap(3).unwrap();
        assert_eq!(change, SelectionChange::Selected { index: 3, rank: 2 });
        assert_ranks_contiguous(&selection);
        assert_eq!(names(&selection.ordered()), ["B", "D"]);
    }

    #[test]
    fn range_mode_selects_prefix_in_index_order() {
        let mut selection =
            GallerySelection::new(gallery(&["A", "B", "C", "D", "E"]), SelectionPolicy::Range);
        selection.tap(2).unwrap();

        assert_eq!(selection.selected_count(), 3);
        assert_eq!(selection.rank(0), Some(1));
        assert_eq!(selection.rank(1), Some(2));
        assert_eq!(selection.rank(2), Some(3));
        assert!(!selection.is_selected(3));
        assert_eq!(names(&selection.ordered()), ["A", "B", "C"]);

        selection.tap(0).unwrap();
        assert_eq!(selection.selected_count(), 1);
        assert_eq!(selection.rank(0), Some(1));
        assert_eq!(names(&selection.ordered()), ["A"]);
    }

    #[test]
    fn tap_out_of_range_is_rejected_without_changes() {
        let mut selection = GallerySelection::new(gallery(&["A"]), SelectionPolicy::Toggle);
        let err = selection.tap(4).unwrap_err();
        assert_eq!(err, SelectionError::IndexOutOfRange { index: 4, len: 1 });
        assert_eq!(selection.selected_count(), 0);
    }

    #[test]
    fn switching_policy_clears_selection() {
        let mut selection = GallerySelection::new(gallery(&["A", "B"]), SelectionPolicy::Toggle);
        selection.tap(1).unwrap();
        selection.set_policy(SelectionPolicy::Range);
        assert_eq!(selection.selected_count(), 0);
        assert_eq!(selection.policy(), SelectionPolicy::Range);
    }

    #[test]
    fn into_ordered_moves_selected_images_out_by_rank() {
        let mut selection = GallerySelection::new(gallery(&["A", "B", "C"]), SelectionPolicy::Toggle);
        selection.tap(1).unwrap();
        selection.tap(2).unwrap();
        let ordered = selection.into_ordered();
        let ids = ordered.iter().map(|image| image.id).collect::<Vec<_>>();
        assert_eq!(ids, [2, 3]);
    }
}
