//! Streaming parse filters: per-node verdicts applied while the tree is
//! being built.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use domoxide::parser::{
    parse_str_with_options, FilterAction, FilterPhase, ParseOptions,
};
use domoxide::NodeKind;

#[test]
fn test_reject_removes_element_and_content() {
    let options = ParseOptions::default().filter(|doc, node, phase| {
        if phase == FilterPhase::Start && doc.node_name(node) == Some("secret") {
            FilterAction::Reject
        } else {
            FilterAction::Accept
        }
    });
    let doc = parse_str_with_options(
        "<r><keep/><secret><inner/>hidden</secret><keep/></r>",
        &options,
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    let names: Vec<_> = doc
        .children(root)
        .filter_map(|id| doc.node_name(id).map(str::to_string))
        .collect();
    assert_eq!(names, ["keep", "keep"]);
}

#[test]
fn test_skip_splices_children_into_parent() {
    let options = ParseOptions::default().filter(|doc, node, phase| {
        if phase == FilterPhase::Complete && doc.node_name(node) == Some("wrapper") {
            FilterAction::Skip
        } else {
            FilterAction::Accept
        }
    });
    let doc = parse_str_with_options(
        "<r><wrapper><a/>text<b/></wrapper></r>",
        &options,
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    let kids: Vec<_> = doc.children(root).collect();
    assert_eq!(kids.len(), 3);
    assert_eq!(doc.node_name(kids[0]), Some("a"));
    assert_eq!(doc.node_text(kids[1]), Some("text"));
    assert_eq!(doc.node_name(kids[2]), Some("b"));
}

#[test]
fn test_interrupt_stops_parsing_with_partial_tree() {
    let options = ParseOptions::default().filter(|doc, node, phase| {
        if phase == FilterPhase::Complete && doc.node_name(node) == Some("stop") {
            FilterAction::Interrupt
        } else {
            FilterAction::Accept
        }
    });
    let doc = parse_str_with_options(
        "<r><before/><stop/><after/></r>",
        &options,
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    let names: Vec<_> = doc
        .children(root)
        .filter_map(|id| doc.node_name(id).map(str::to_string))
        .collect();
    // Parsing halted before <after/> was ever built.
    assert_eq!(names, ["before", "stop"]);
}

#[test]
fn test_filter_not_consulted_inside_rejected_subtree() {
    let visits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&visits);
    let options = ParseOptions::default().filter(move |doc, node, phase| {
        if matches!(doc.node(node).kind, NodeKind::Element { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        if phase == FilterPhase::Start && doc.node_name(node) == Some("skip-me") {
            FilterAction::Reject
        } else {
            FilterAction::Accept
        }
    });
    let doc = parse_str_with_options(
        "<r><skip-me><a/><b/><c/></skip-me></r>",
        &options,
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    assert_eq!(doc.children(root).count(), 0);
    // Start and Complete for <r>, Start for <skip-me>; nothing inside.
    assert_eq!(visits.load(Ordering::SeqCst), 3);
}

#[test]
fn test_filter_sees_leaf_nodes() {
    let options = ParseOptions::default().filter(|doc, node, phase| {
        if phase == FilterPhase::Complete
            && matches!(doc.node(node).kind, NodeKind::Comment { .. })
        {
            FilterAction::Reject
        } else {
            FilterAction::Accept
        }
    });
    let doc = parse_str_with_options(
        "<r>a<!-- drop me -->b</r>",
        &options,
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    assert!(doc
        .descendants(root)
        .all(|id| !matches!(doc.node(id).kind, NodeKind::Comment { .. })));
}
