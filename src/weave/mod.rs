//! The PCDV file weave (spec §4.6).
//!
//! Every line ever seen in any version of a file lives in one shared
//! [`Weave`]; a [`FileState`] is a revision's view of it, recording which
//! lines are currently live via [`living::Living`]. Resolving a new
//! revision's content against an existing state appends new lines to the
//! weave and marks superseded lines dead, but never renumbers or removes an
//! existing line, so older `FileState`s stay valid.

pub mod lcs;
pub mod living;

pub use living::Living;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::PcdvError;
use crate::ident::RevisionId;

/// A line's identity: the revision it was born in, plus its position among
/// lines born in that same revision. Independent of content and of the
/// line's current position in the weave.
pub type LineId = (RevisionId, usize);

/// One line of the weave: its identity and its (immutable) text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeaveLine {
    pub id: LineId,
    pub text: String,
}

/// The shared, append-only backing store of a file's history: every line
/// ever born, in an order consistent with how each revision saw them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Weave {
    lines: Vec<WeaveLine>,
}

/// A shared handle to one file's [`Weave`]. Cloning is cheap (an `Arc`
/// refcount bump); mutation happens only inside [`resolve`], which clones
/// the underlying data only if another handle is still looking at it
/// (copy-on-write via [`Arc::make_mut`]).
pub type WeaveHandle = Arc<Weave>;

/// One revision's view of a [`Weave`]: which lines are currently live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileState {
    weave: WeaveHandle,
    statuses: std::collections::BTreeMap<LineId, Living<()>>,
}

impl FileState {
    /// The state of a file with no content and no history.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            weave: Arc::new(Weave::default()),
            statuses: std::collections::BTreeMap::new(),
        }
    }

    /// Borrow the underlying weave handle.
    #[must_use]
    pub fn weave(&self) -> &WeaveHandle {
        &self.weave
    }

    /// The currently live lines' text, in weave order.
    #[must_use]
    pub fn live_lines(&self) -> Vec<&str> {
        self.weave
            .lines
            .iter()
            .filter(|wl| self.is_live(wl.id))
            .map(|wl| wl.text.as_str())
            .collect()
    }

    fn is_live(&self, id: LineId) -> bool {
        self.statuses.get(&id).is_some_and(Living::is_live)
    }
}

/// Compute the next state of a file: its live lines are matched against
/// `new_content_lines` via [`lcs::unique_lcs`]; unmatched old lines die at
/// `rev`, unmatched new lines are born at `rev` and spliced into the weave
/// between their flanking matched lines (spec §4.6).
#[must_use]
pub fn resolve(old: &FileState, new_content_lines: &[&str], rev: RevisionId) -> FileState {
    let mut weave = old.weave.clone();
    let mut statuses = old.statuses.clone();

    let live: Vec<(usize, LineId, String)> = weave
        .lines
        .iter()
        .enumerate()
        .filter(|(_, wl)| old.is_live(wl.id))
        .map(|(i, wl)| (i, wl.id, wl.text.clone()))
        .collect();

    let old_texts: Vec<&str> = live.iter().map(|(_, _, text)| text.as_str()).collect();
    let matches = lcs::unique_lcs(&old_texts, new_content_lines);

    let matched_old: BTreeSet<usize> = matches.iter().map(|&(local_old, _)| local_old).collect();
    for (local_old, (_, id, _)) in live.iter().enumerate() {
        if !matched_old.contains(&local_old) {
            let status = statuses.entry(*id).or_insert_with(Living::new);
            *status = status.kill(rev);
        }
    }

    let weave_mut = Arc::make_mut(&mut weave);
    let mut output = Vec::with_capacity(weave_mut.lines.len() + new_content_lines.len());
    let mut old_cursor = 0usize;
    let mut next_birth_position = 0usize;
    let mut match_iter = matches.iter().peekable();

    for (new_i, &text) in new_content_lines.iter().enumerate() {
        if let Some(&&(local_old, local_new)) = match_iter.peek() {
            if local_new == new_i {
                let anchor = live[local_old].0;
                while old_cursor <= anchor {
                    output.push(weave_mut.lines[old_cursor].clone());
                    old_cursor += 1;
                }
                match_iter.next();
                continue;
            }
        }
        let id = (rev, next_birth_position);
        next_birth_position += 1;
        output.push(WeaveLine {
            id,
            text: text.to_string(),
        });
        statuses.insert(id, Living::new().set(rev, ()));
    }
    while old_cursor < weave_mut.lines.len() {
        output.push(weave_mut.lines[old_cursor].clone());
        old_cursor += 1;
    }
    weave_mut.lines = output;

    FileState { weave, statuses }
}

/// Merge two file-states over the same weave, combining every line's
/// living-status by [`Living::merge`] (spec §4.6's `mash`).
///
/// # Errors
/// [`PcdvError::InvariantViolation`] if `left` and `right` do not share the
/// same weave handle.
pub fn mash(left: &FileState, right: &FileState) -> Result<FileState, PcdvError> {
    require_shared_weave(left, right)?;
    let mut statuses = left.statuses.clone();
    for (id, right_status) in &right.statuses {
        statuses
            .entry(*id)
            .and_modify(|s| *s = s.merge(right_status))
            .or_insert_with(|| right_status.clone());
    }
    Ok(FileState {
        weave: left.weave.clone(),
        statuses,
    })
}

/// A run of consecutive weave lines, classified as clean or conflicting
/// (spec §4.6's `conflict`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Section {
    /// Live identically on both sides (and in the merge).
    Clean(Vec<String>),
    /// Left and right disagree on liveness, and the merge does not simply
    /// adopt one side: both variants are kept for the oracle to resolve.
    Conflict {
        left: Vec<String>,
        right: Vec<String>,
    },
}

/// Walk the weave in order and classify each line as clean or conflicting,
/// consolidating adjacent runs of the same kind (spec §4.6).
///
/// # Errors
/// [`PcdvError::InvariantViolation`] if `left` and `right` do not share the
/// same weave handle.
pub fn conflict(left: &FileState, right: &FileState) -> Result<Vec<Section>, PcdvError> {
    require_shared_weave(left, right)?;
    let merged = mash(left, right)?;

    let mut sections: Vec<Section> = Vec::new();
    for wl in &left.weave.lines {
        let l_live = left.is_live(wl.id);
        let r_live = right.is_live(wl.id);
        let m_live = merged.is_live(wl.id);
        let is_conflict = l_live != r_live && (m_live != l_live || m_live != r_live);

        if is_conflict {
            match sections.last_mut() {
                Some(Section::Conflict { left, right }) => {
                    if l_live {
                        left.push(wl.text.clone());
                    }
                    if r_live {
                        right.push(wl.text.clone());
                    }
                }
                _ => {
                    let mut left_lines = Vec::new();
                    let mut right_lines = Vec::new();
                    if l_live {
                        left_lines.push(wl.text.clone());
                    }
                    if r_live {
                        right_lines.push(wl.text.clone());
                    }
                    sections.push(Section::Conflict {
                        left: left_lines,
                        right: right_lines,
                    });
                }
            }
        } else if l_live {
            match sections.last_mut() {
                Some(Section::Clean(lines)) => lines.push(wl.text.clone()),
                _ => sections.push(Section::Clean(vec![wl.text.clone()])),
            }
        }
        // Dead on both sides: contributes to no section.
    }
    Ok(sections)
}

fn require_shared_weave(left: &FileState, right: &FileState) -> Result<(), PcdvError> {
    if !Arc::ptr_eq(&left.weave, &right.weave) {
        return Err(PcdvError::invariant(
            "mash/conflict require both file-states to share the same weave",
        ));
    }
    Ok(())
}
