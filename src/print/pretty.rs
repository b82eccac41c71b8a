//! Indentation-aware layout of printed statements.
//!
//! Printing builds a tree of [`Fragment`]s, whose line breaks and indentation
//! are only decided when the tree is written out (see [`Layout`]).

use smallvec::SmallVec;
use std::borrow::Cow;
use std::fmt;

/// Sequence of [`Node`]s laid out one after the other.
#[derive(Clone, Default, PartialEq)]
pub struct Fragment {
    pub nodes: SmallVec<[Node; 8]>,
}

#[derive(Clone, PartialEq)]
pub enum Node {
    Text(Cow<'static, str>),

    /// Fragments on their own lines, one indentation level deeper.
    IndentedBlock(Vec<Fragment>),

    /// A space, unless already at the start or end of a line.
    BreakingOnlySpace,

    /// A newline, unless already at the start or end of a line.
    ForceLineSeparation,
}

impl From<&'static str> for Node {
    fn from(text: &'static str) -> Self {
        Self::Text(text.into())
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Self::Text(text.into())
    }
}

impl<T: Into<Node>> From<T> for Fragment {
    fn from(x: T) -> Self {
        Self { nodes: [x.into()].into_iter().collect() }
    }
}

impl Fragment {
    pub fn new(fragments: impl IntoIterator<Item = impl Into<Self>>) -> Self {
        Self { nodes: fragments.into_iter().flat_map(|fragment| fragment.into().nodes).collect() }
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Layout::new(f).fragment(self)
    }
}

pub(super) const INDENT: &str = "  ";

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Separator {
    Space,
    Newline,
}

/// Writer state while laying out a [`Fragment`].
///
/// Separators are held back until the next piece of text, so that neither
/// trailing whitespace nor blank lines can be produced by them, and
/// indentation is only written in front of the first text on a line.
struct Layout<'a, 'f> {
    out: &'a mut fmt::Formatter<'f>,
    depth: usize,
    at_line_start: bool,
    pending: Option<Separator>,
}

impl<'a, 'f> Layout<'a, 'f> {
    fn new(out: &'a mut fmt::Formatter<'f>) -> Self {
        Layout { out, depth: 0, at_line_start: true, pending: None }
    }

    fn fragment(&mut self, fragment: &Fragment) -> fmt::Result {
        fragment.nodes.iter().try_for_each(|node| self.node(node))
    }

    fn node(&mut self, node: &Node) -> fmt::Result {
        match node {
            Node::Text(text) => {
                for (i, line) in text.split('\n').enumerate() {
                    if i > 0 {
                        self.out.write_str("\n")?;
                        self.at_line_start = true;
                        self.pending = None;
                    }
                    self.text(line)?;
                }
                Ok(())
            }
            Node::IndentedBlock(fragments) => {
                self.depth += 1;
                for fragment in fragments {
                    self.separate(Separator::Newline);
                    self.fragment(fragment)?;
                }
                self.separate(Separator::Newline);
                self.depth -= 1;
                Ok(())
            }
            Node::BreakingOnlySpace => {
                self.separate(Separator::Space);
                Ok(())
            }
            Node::ForceLineSeparation => {
                self.separate(Separator::Newline);
                Ok(())
            }
        }
    }

    fn separate(&mut self, sep: Separator) {
        if !self.at_line_start {
            self.pending = self.pending.max(Some(sep));
        }
    }

    fn text(&mut self, text: &str) -> fmt::Result {
        if text.is_empty() {
            return Ok(());
        }
        match self.pending.take() {
            Some(Separator::Space) => self.out.write_str(" ")?,
            Some(Separator::Newline) => {
                self.out.write_str("\n")?;
                self.at_line_start = true;
            }
            None => {}
        }
        if self.at_line_start {
            for _ in 0..self.depth {
                self.out.write_str(INDENT)?;
            }
            self.at_line_start = false;
        }
        self.out.write_str(text)
    }
}

/// `header {`, then each of `contents` indented on its own line, then `}`.
pub fn braced_block(
    header: impl Into<Fragment>,
    contents: impl IntoIterator<Item = impl Into<Fragment>>,
) -> Fragment {
    let mut fragment = header.into();
    fragment.nodes.extend([
        Node::BreakingOnlySpace,
        "{".into(),
        Node::IndentedBlock(contents.into_iter().map(Into::into).collect()),
        "}".into(),
    ]);
    fragment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indentation_and_line_breaks() {
        let inner = braced_block("if (true)", [Fragment::from("x = 1u;")]);
        let outer = braced_block("loop", [inner, Fragment::from("break;")]);
        assert_eq!(outer.to_string(), "loop {\n  if (true) {\n    x = 1u;\n  }\n  break;\n}");
    }

    #[test]
    fn empty_block_keeps_braces_on_separate_lines() {
        let empty = braced_block("if (true)", Vec::<Fragment>::new());
        assert_eq!(empty.to_string(), "if (true) {\n}");
    }

    #[test]
    fn force_line_separation_is_idempotent() {
        let frag = Fragment::new([
            Node::from("a;"),
            Node::ForceLineSeparation,
            Node::ForceLineSeparation,
            Node::from("b;"),
        ]);
        assert_eq!(frag.to_string(), "a;\nb;");
    }

    #[test]
    fn separators_at_line_edges_are_dropped() {
        let frag = Fragment::new([
            Node::BreakingOnlySpace,
            Node::from("a"),
            Node::BreakingOnlySpace,
            Node::ForceLineSeparation,
            Node::from("b"),
            Node::BreakingOnlySpace,
        ]);
        assert_eq!(frag.to_string(), "a\nb");
    }
}
