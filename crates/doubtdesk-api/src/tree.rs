//! Reply forest construction from a flat, creation-ordered comment list.

use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use doubtdesk_types::models::{Comment, CommentNode};

/// Build the reply forest for one doubt.
///
/// `comments` must be in creation order. A comment is attached under its parent
/// only when the parent appears *earlier* in the list and belongs to the same
/// doubt. Anything else is returned as a root. Sibling order follows creation order.
pub fn build_forest(comments: Vec<Comment>) -> Vec<CommentNode> {
    let n = comments.len();
    let mut index: HashMap<Uuid, usize> = HashMap::with_capacity(n);
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut roots: Vec<usize> = Vec::new();

    // Single pass: every parent seen so far is already in `index`.
    for (i, comment) in comments.iter().enumerate() {
        let parent = comment.parent_id.and_then(|pid| index.get(&pid).copied());
        match parent {
            Some(p) if comments[p].doubt_id == comment.doubt_id => children[p].push(i),
            _ => {
                if let Some(pid) = comment.parent_id {
                    warn!(
                        "Comment {} references unresolvable parent {}; listing it as a root",
                        comment.id, pid
                    );
                }
                roots.push(i);
            }
        }
        index.insert(comment.id, i);
    }

    // Children always sit at higher indices than their parent, so walking
    // backwards builds every subtree before the node that owns it.
    let mut slots: Vec<Option<Comment>> = comments.into_iter().map(Some).collect();
    let mut built: Vec<Option<CommentNode>> = (0..n).map(|_| None).collect();
    for i in (0..n).rev() {
        let replies = children[i]
            .iter()
            .filter_map(|&c| built[c].take())
            .collect();
        if let Some(comment) = slots[i].take() {
            built[i] = Some(CommentNode { comment, replies });
        }
    }

    roots.into_iter().filter_map(|r| built[r].take()).collect()
}

/// Total number of comments in a forest, nested replies included.
pub fn forest_len(forest: &[CommentNode]) -> usize {
    let mut total = 0;
    let mut stack: Vec<&CommentNode> = forest.iter().collect();
    while let Some(node) = stack.pop() {
        total += 1;
        stack.extend(node.replies.iter());
    }
    total
}

enum Step<'a> {
    Open { node: &'a CommentNode, first: bool },
    Close,
}

/// Render a forest as a JSON array of comments, each carrying a nested
/// `replies` array. Every comment is serialized flat and the nesting is
/// written from an explicit stack, so depth only costs heap.
pub fn forest_json(forest: &[CommentNode]) -> serde_json::Result<String> {
    let mut out = String::from("[");
    let mut stack = Vec::new();
    push_level(&mut stack, forest);

    while let Some(step) = stack.pop() {
        match step {
            Step::Open { node, first } => {
                if !first {
                    out.push(',');
                }
                let flat = serde_json::to_string(&node.comment)?;
                // A serialized `Comment` is a non-empty object; reopen it to append `replies`.
                out.push_str(flat.strip_suffix('}').unwrap_or(&flat));
                out.push_str(",\"replies\":[");
                stack.push(Step::Close);
                push_level(&mut stack, &node.replies);
            }
            Step::Close => out.push_str("]}"),
        }
    }

    out.push(']');
    Ok(out)
}

fn push_level<'a>(stack: &mut Vec<Step<'a>>, level: &'a [CommentNode]) {
    for (i, node) in level.iter().enumerate().rev() {
        stack.push(Step::Open { node, first: i == 0 });
    }
}
