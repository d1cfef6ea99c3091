use std::fmt;

/// Depth in the field-resolution tree.
///
/// Level 1 is the operation's root field set; level `L + 1` holds the field
/// sets produced by resolving object- or list-of-object-valued fields
/// discovered at level `L`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Level(u32);

impl Level {
    pub const ROOT: Level = Level(1);

    /// Returns `None` for a depth of zero, which never exists in a tree.
    pub fn new(depth: u32) -> Option<Self> {
        (depth >= 1).then_some(Level(depth))
    }

    pub fn depth(self) -> u32 {
        self.0
    }

    pub fn parent(self) -> Option<Level> {
        (self.0 > 1).then_some(Level(self.0 - 1))
    }

    pub fn child(self) -> Level {
        Level(self.0 + 1)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Level;

    #[test]
    fn root_has_no_parent() {
        assert_eq!(Level::ROOT.parent(), None);
        assert_eq!(Level::ROOT.child().parent(), Some(Level::ROOT));
    }

    #[test]
    fn zero_depth_is_rejected() {
        assert_eq!(Level::new(0), None);
        assert_eq!(Level::new(1), Some(Level::ROOT));
    }
}
