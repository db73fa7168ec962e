//! Threaded view over the flat comment list of an article.
//!
//! Every operation here is pure: it takes a tree by reference and hands back a
//! new one, so a client can fold server responses into its working copy
//! without refetching.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data_formats::CommentResponse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: CommentResponse,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    fn leaf(comment: CommentResponse) -> Self {
        CommentNode {
            comment,
            replies: Vec::new(),
        }
    }

    pub fn id(&self) -> i64 {
        self.comment.id
    }

    /// Number of comments in this subtree, the node itself included.
    pub fn subtree_len(&self) -> usize {
        1 + self.replies.iter().map(CommentNode::subtree_len).sum::<usize>()
    }
}

/// Mutable fields a client may patch in place after an edit or a vote.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPatch {
    pub content: Option<String>,
    pub likes: Option<i64>,
    pub dislikes: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CommentPatch {
    fn apply(&self, comment: &CommentResponse) -> CommentResponse {
        let mut comment = comment.clone();
        if let Some(content) = self.content.as_ref().filter(|c| !c.is_empty()) {
            comment.content = content.clone();
        }
        if let Some(likes) = self.likes {
            comment.likes = likes;
        }
        if let Some(dislikes) = self.dislikes {
            comment.dislikes = dislikes;
        }
        if let Some(updated_at) = self.updated_at {
            comment.updated_at = updated_at;
        }
        comment
    }
}

/// Deepest nesting level a reply is shown at; roots are level 0. Replies
/// further down hang under their ancestor at `MAX_DEPTH - 1`, which keeps
/// every tree bounded no matter how long a reply chain grows.
pub const MAX_DEPTH: usize = 32;

/// Builds the reply tree.
///
/// Replies keep the order in which they were delivered; roots are ordered
/// newest first. A comment whose parent is not in the list is promoted to a
/// root rather than dropped, and so is the first comment found on a parent
/// cycle. Later duplicates of an id are ignored. Nothing here recurses, so a
/// reply chain of any length is safe to build.
pub fn build_tree(comments: Vec<CommentResponse>) -> Vec<CommentNode> {
    let mut seen = HashSet::new();
    let comments: Vec<CommentResponse> = comments
        .into_iter()
        .filter(|c| seen.insert(c.id))
        .collect();
    let position: HashMap<i64, usize> = comments
        .iter()
        .enumerate()
        .map(|(index, comment)| (comment.id, index))
        .collect();

    let mut parent: Vec<Option<usize>> = comments
        .iter()
        .map(|c| c.parent_id.and_then(|p| position.get(&p).copied()))
        .collect();
    let depth = resolve_depths(&mut parent);

    // Children always sit one level below their parent, so building the
    // deepest level first finds every reply list ready.
    let mut order: Vec<usize> = (0..comments.len()).collect();
    order.sort_by(|a, b| depth[*b].cmp(&depth[*a]));

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); comments.len()];
    for (index, parent) in parent.iter().enumerate() {
        if let Some(parent) = parent {
            children[*parent].push(index);
        }
    }

    let mut slots: Vec<Option<CommentResponse>> = comments.into_iter().map(Some).collect();
    let mut built: Vec<Option<CommentNode>> = vec![None; slots.len()];
    for index in order {
        let replies = children[index]
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        if let Some(comment) = slots[index].take() {
            built[index] = Some(CommentNode { comment, replies });
        }
    }

    let mut tree: Vec<CommentNode> = parent
        .iter()
        .enumerate()
        .filter(|(_, parent)| parent.is_none())
        .filter_map(|(index, _)| built[index].take())
        .collect();
    tree.sort_by(|a, b| b.comment.created_at.cmp(&a.comment.created_at));
    tree
}

/// Works out every comment's level, walking parent links with an explicit
/// path instead of the call stack. Cycles are cut by turning the comment
/// where the walk closes the loop into a root, and replies past
/// [`MAX_DEPTH`] are re-pointed at the ancestor on the last allowed level.
fn resolve_depths(parent: &mut [Option<usize>]) -> Vec<usize> {
    let mut depth: Vec<Option<usize>> = vec![None; parent.len()];
    let mut on_path = vec![false; parent.len()];
    let mut path = Vec::new();

    for start in 0..parent.len() {
        let mut current = Some(start);
        while let Some(index) = current {
            if depth[index].is_some() {
                break;
            }
            if on_path[index] {
                parent[index] = None;
                depth[index] = Some(0);
                break;
            }
            on_path[index] = true;
            path.push(index);
            current = parent[index];
        }

        for index in path.drain(..).rev() {
            on_path[index] = false;
            if depth[index].is_some() {
                continue;
            }
            let level = match parent[index] {
                None => 0,
                Some(up) => {
                    let up_level = depth[up].unwrap_or(0);
                    if up_level + 1 > MAX_DEPTH {
                        parent[index] = parent[up];
                        MAX_DEPTH
                    } else {
                        up_level + 1
                    }
                }
            };
            depth[index] = Some(level);
        }
    }

    depth.into_iter().map(|d| d.unwrap_or(0)).collect()
}

/// Inserts `comment` under `parent_id`, or at the front of the roots when it
/// has no parent. An unknown parent leaves the tree unchanged.
pub fn insert_reply(
    tree: &[CommentNode],
    comment: CommentResponse,
    parent_id: Option<i64>,
) -> Vec<CommentNode> {
    match parent_id {
        None => std::iter::once(CommentNode::leaf(comment))
            .chain(tree.iter().cloned())
            .collect(),
        Some(parent_id) => tree
            .iter()
            .map(|node| {
                if node.id() == parent_id {
                    let mut replies = node.replies.clone();
                    replies.push(CommentNode::leaf(comment.clone()));
                    CommentNode {
                        comment: node.comment.clone(),
                        replies,
                    }
                } else {
                    CommentNode {
                        comment: node.comment.clone(),
                        replies: insert_reply(&node.replies, comment.clone(), Some(parent_id)),
                    }
                }
            })
            .collect(),
    }
}

pub fn update_comment(tree: &[CommentNode], id: i64, patch: &CommentPatch) -> Vec<CommentNode> {
    tree.iter()
        .map(|node| {
            if node.id() == id {
                CommentNode {
                    comment: patch.apply(&node.comment),
                    replies: node.replies.clone(),
                }
            } else {
                CommentNode {
                    comment: node.comment.clone(),
                    replies: update_comment(&node.replies, id, patch),
                }
            }
        })
        .collect()
}

/// Removes the comment with `id` together with all of its descendants.
pub fn remove_comment(tree: &[CommentNode], id: i64) -> Vec<CommentNode> {
    tree.iter()
        .filter(|node| node.id() != id)
        .map(|node| CommentNode {
            comment: node.comment.clone(),
            replies: remove_comment(&node.replies, id),
        })
        .collect()
}

pub fn find_comment(tree: &[CommentNode], id: i64) -> Option<&CommentNode> {
    tree.iter().find_map(|node| {
        if node.id() == id {
            Some(node)
        } else {
            find_comment(&node.replies, id)
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::data_formats::AuthorResponse;

    fn comment(id: i64, parent_id: Option<i64>, minute: i64) -> CommentResponse {
        let created_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minute);
        CommentResponse {
            id,
            content: format!("comment {id}"),
            author_id: 1,
            article_id: 1,
            parent_id,
            likes: 0,
            dislikes: 0,
            created_at,
            updated_at: created_at,
            author: AuthorResponse {
                id: 1,
                name: "Lemmy".to_string(),
                avatar_url: None,
            },
        }
    }

    fn ids(nodes: &[CommentNode]) -> Vec<i64> {
        nodes.iter().map(CommentNode::id).collect()
    }

    #[test]
    fn roots_are_newest_first_and_replies_keep_delivery_order() {
        // Delivered oldest-first, the way the list endpoint returns them.
        let tree = build_tree(vec![
            comment(1, None, 0),
            comment(2, None, 1),
            comment(3, Some(1), 2),
        ]);
        assert_eq!(ids(&tree), vec![2, 1]);
        assert_eq!(ids(&tree[1].replies), vec![3]);
        assert!(tree[0].replies.is_empty());
    }

    #[test]
    fn every_comment_lands_under_its_parent_exactly_once() {
        let flat = vec![
            comment(1, None, 0),
            comment(2, Some(1), 1),
            comment(3, Some(2), 2),
            comment(4, Some(1), 3),
            comment(5, None, 4),
            comment(6, Some(5), 5),
            comment(2, None, 9),
        ];
        let tree = build_tree(flat);
        assert_eq!(tree.iter().map(CommentNode::subtree_len).sum::<usize>(), 6);

        fn check(nodes: &[CommentNode]) {
            for node in nodes {
                for reply in &node.replies {
                    assert_eq!(reply.comment.parent_id, Some(node.id()));
                }
                check(&node.replies);
            }
        }
        check(&tree);
        assert_eq!(ids(&find_comment(&tree, 1).unwrap().replies), vec![2, 4]);
        assert_eq!(ids(&find_comment(&tree, 2).unwrap().replies), vec![3]);
    }

    #[test]
    fn orphaned_replies_are_promoted_to_roots() {
        let tree = build_tree(vec![comment(1, None, 0), comment(7, Some(42), 1)]);
        assert_eq!(ids(&tree), vec![7, 1]);
    }

    #[test]
    fn parent_cycles_do_not_lose_comments() {
        let tree = build_tree(vec![comment(1, Some(2), 0), comment(2, Some(1), 1)]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].subtree_len(), 2);
    }

    #[test]
    fn long_reply_chains_are_flattened_at_the_depth_cap() {
        let chain_len: i64 = 20_000;
        let flat = (1..=chain_len)
            .map(|id| comment(id, (id > 1).then(|| id - 1), id))
            .collect();
        let tree = build_tree(flat);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].subtree_len(), chain_len as usize);

        fn levels(nodes: &[CommentNode]) -> usize {
            nodes.iter().map(|n| 1 + levels(&n.replies)).max().unwrap_or(0)
        }
        assert_eq!(levels(&tree), MAX_DEPTH + 1);

        // The comment on the last parent level collects the rest of the chain
        // in delivery order.
        let mut node = &tree[0];
        for _ in 1..MAX_DEPTH {
            node = &node.replies[0];
        }
        assert_eq!(node.id(), MAX_DEPTH as i64);
        assert_eq!(node.replies.len(), chain_len as usize - MAX_DEPTH);
        assert_eq!(node.replies[0].id(), MAX_DEPTH as i64 + 1);
        assert_eq!(node.replies.last().unwrap().id(), chain_len);
        assert!(serde_json::to_vec(&tree).is_ok());
    }

    #[test]
    fn insert_places_reply_under_parent_and_root_in_front() {
        let tree = build_tree(vec![comment(1, None, 0), comment(2, Some(1), 1)]);

        let tree = insert_reply(&tree, comment(3, Some(2), 2), Some(2));
        assert_eq!(ids(&find_comment(&tree, 2).unwrap().replies), vec![3]);

        let tree = insert_reply(&tree, comment(4, None, 3), None);
        assert_eq!(ids(&tree), vec![4, 1]);

        let unchanged = insert_reply(&tree, comment(5, Some(99), 4), Some(99));
        assert_eq!(unchanged, tree);
    }

    #[test]
    fn update_patches_only_the_target() {
        let tree = build_tree(vec![comment(1, None, 0), comment(2, Some(1), 1)]);
        let patch = CommentPatch {
            likes: Some(3),
            content: Some(String::new()),
            ..Default::default()
        };
        let updated = update_comment(&tree, 2, &patch);

        let reply = find_comment(&updated, 2).unwrap();
        assert_eq!(reply.comment.likes, 3);
        assert_eq!(reply.comment.content, "comment 2");
        assert_eq!(find_comment(&updated, 1).unwrap().comment.likes, 0);
        // The original is left alone.
        assert_eq!(find_comment(&tree, 2).unwrap().comment.likes, 0);
    }

    #[test]
    fn remove_drops_the_whole_subtree() {
        let tree = build_tree(vec![
            comment(1, None, 0),
            comment(2, Some(1), 1),
            comment(3, Some(2), 2),
            comment(4, None, 3),
        ]);
        let pruned = remove_comment(&tree, 2);
        assert!(find_comment(&pruned, 2).is_none());
        assert!(find_comment(&pruned, 3).is_none());
        assert!(find_comment(&pruned, 1).unwrap().replies.is_empty());
        assert_eq!(pruned.iter().map(CommentNode::subtree_len).sum::<usize>(), 2);
    }
}
