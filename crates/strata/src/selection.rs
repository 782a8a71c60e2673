//! Per-tile record of the previous frame's selection decision.
//!
//! Traversal consults last frame's decision to keep the scene stable while
//! detail streams in: a tile that was rendered last frame keeps rendering
//! until its replacement is ready, and a tile whose descendants were pulled
//! from the render list remembers that it happened.

/// How a tile was selected during a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionResult {
    /// The tile was not visited, so no decision was made.
    None,
    /// The tile was deemed not visible and culled.
    Culled,
    /// The tile was selected for rendering.
    Rendered,
    /// The tile did not meet the required screen-space error and was refined
    /// into its children.
    Refined,
    /// The tile was rendered, then kicked out of the render list in favor of
    /// an ancestor because part of the subtree is not yet renderable.
    RenderedAndKicked,
    /// The tile was refined, then its rendered descendants were kicked out
    /// of the render list in favor of an ancestor.
    RefinedAndKicked,
}

/// A selection decision stamped with the frame it was made in.
///
/// Queries take the frame number being asked about; a stored decision from
/// any other frame reads as [`SelectionResult::None`], so stale state never
/// leaks across frames.
#[derive(Debug, Clone, Copy)]
pub struct TileSelectionState {
    frame_number: u32,
    result: SelectionResult,
}

impl Default for TileSelectionState {
    fn default() -> Self {
        Self {
            frame_number: 0,
            result: SelectionResult::None,
        }
    }
}

impl TileSelectionState {
    /// Create a state holding a decision made in the given frame.
    #[must_use]
    pub fn new(frame_number: u32, result: SelectionResult) -> Self {
        Self {
            frame_number,
            result,
        }
    }

    /// The decision made in the given frame, or `None` if the stored
    /// decision is from a different frame.
    #[must_use]
    pub fn result(&self, frame_number: u32) -> SelectionResult {
        if self.frame_number != frame_number {
            return SelectionResult::None;
        }
        self.result
    }

    /// Whether this tile or its descendants were kicked from the render
    /// list in the given frame.
    #[must_use]
    pub fn was_kicked(&self, frame_number: u32) -> bool {
        let result = self.result(frame_number);
        result == SelectionResult::RenderedAndKicked || result == SelectionResult::RefinedAndKicked
    }

    /// The decision made in the given frame, with any kick folded back to
    /// the decision that preceded it.
    #[must_use]
    pub fn original_result(&self, frame_number: u32) -> SelectionResult {
        match self.result(frame_number) {
            SelectionResult::RenderedAndKicked => SelectionResult::Rendered,
            SelectionResult::RefinedAndKicked => SelectionResult::Refined,
            other => other,
        }
    }

    /// Mark the stored decision as kicked. Only `Rendered` and `Refined`
    /// decisions change; anything else stays as is.
    pub fn kick(&mut self) {
        self.result = match self.result {
            SelectionResult::Rendered => SelectionResult::RenderedAndKicked,
            SelectionResult::Refined => SelectionResult::RefinedAndKicked,
            other => other,
        };
    }
}
