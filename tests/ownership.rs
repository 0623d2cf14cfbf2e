//! Document and node handle lifecycle across the public API.

use pretty_assertions::assert_eq;
use std::thread;
use xmltether::{Document, Error, NodeType};

#[test]
fn test_node_handles_keep_the_tree_alive() {
    let item = {
        let doc = Document::parse_str("<shelf><item>lamp</item></shelf>").unwrap();
        doc.root_element().unwrap().first_child().unwrap().unwrap()
    };
    // The last Document handle is gone; the proxy still reads the tree.
    assert_eq!(item.text_content().unwrap(), "lamp");
    assert_eq!(item.name().unwrap().as_deref(), Some("item"));
}

#[test]
fn test_live_handle_count_is_observable() {
    let doc = Document::parse_str("<a><b/><c/></a>").unwrap();
    assert_eq!(doc.live_handles(), 1);

    let root = doc.root_element().unwrap();
    let kids = root.children().unwrap();
    assert_eq!(doc.live_handles(), 4);

    // Asking again for an already-proxied node adds nothing.
    let again = doc.root_element().unwrap();
    assert_eq!(doc.live_handles(), 4);

    drop(again);
    drop(kids);
    drop(root);
    assert_eq!(doc.live_handles(), 1);
}

#[test]
fn test_proxies_are_identity_mapped() {
    let doc = Document::parse_str("<a><b/></a>").unwrap();
    let via_parent = doc.root_element().unwrap().first_child().unwrap().unwrap();
    let via_clone = doc
        .clone()
        .root_element()
        .unwrap()
        .children()
        .unwrap()
        .remove(0);
    assert!(via_parent == via_clone);
}

#[test]
fn test_removal_invalidates_every_handle_in_the_subtree() {
    let doc = Document::parse_str("<a><b><c/><d/></b></a>").unwrap();
    let b = doc.root_element().unwrap().first_child().unwrap().unwrap();
    let grandchildren = b.children().unwrap();

    b.remove().unwrap();

    assert!(!b.is_valid());
    for child in &grandchildren {
        assert!(matches!(child.node_type(), Err(Error::StaleReference)));
    }
    // The rest of the document is untouched.
    assert_eq!(doc.to_xml(), "<a/>");
}

#[test]
fn test_detach_is_not_removal() {
    let doc = Document::parse_str("<a><b>x</b><c/></a>").unwrap();
    let root = doc.root_element().unwrap();
    let b = root.first_child().unwrap().unwrap();

    b.detach().unwrap();
    assert!(b.is_valid());
    assert_eq!(doc.to_xml(), "<a><c/></a>");

    let c = root.first_child().unwrap().unwrap();
    c.insert_after(&b).unwrap();
    assert_eq!(doc.to_xml(), "<a><c/><b>x</b></a>");
}

#[test]
fn test_stale_handles_stay_stale() {
    let doc = Document::parse_str("<a><b/></a>").unwrap();
    let b = doc.root_element().unwrap().first_child().unwrap().unwrap();
    b.remove().unwrap();

    // Re-adding a node with the same shape does not resurrect the handle.
    let b2 = doc.create_element("b").unwrap();
    doc.root_element().unwrap().append_child(&b2).unwrap();
    assert!(matches!(b.name(), Err(Error::StaleReference)));
    assert!(b2.is_valid());
}

#[test]
fn test_cross_document_move_migrates_subtree_handles() {
    let src = Document::parse_str("<src><chunk><leaf a=\"1\"/></chunk></src>").unwrap();
    let dst = Document::parse_str("<dst/>").unwrap();
    let chunk = src.root_element().unwrap().first_child().unwrap().unwrap();
    let leaf = chunk.first_child().unwrap().unwrap();

    chunk.move_to(&dst.root_element().unwrap()).unwrap();

    assert_eq!(src.to_xml(), "<src/>");
    assert_eq!(dst.to_xml(), "<dst><chunk><leaf a=\"1\"/></chunk></dst>");
    // Both handles follow the subtree into the destination document.
    assert_eq!(leaf.attribute("a").unwrap().as_deref(), Some("1"));
    assert!(chunk.same_document(&dst.root_element().unwrap()));
    assert!(leaf.parent().unwrap().unwrap() == chunk);
}

#[test]
fn test_cross_document_move_updates_handle_counts() {
    let src = Document::parse_str("<src><m/></src>").unwrap();
    let dst = Document::parse_str("<dst/>").unwrap();
    let m = src.root_element().unwrap().first_child().unwrap().unwrap();
    assert_eq!(src.live_handles(), 2);
    assert_eq!(dst.live_handles(), 1);

    dst.root_element().unwrap().append_child(&m).unwrap();

    // The moved proxy now counts against the destination.
    assert_eq!(src.live_handles(), 1);
    assert_eq!(dst.live_handles(), 2);
    drop(m);
    assert_eq!(dst.live_handles(), 1);
}

#[test]
fn test_moving_a_node_into_its_own_subtree_fails() {
    let doc = Document::parse_str("<a><b><c/></b></a>").unwrap();
    let b = doc.root_element().unwrap().first_child().unwrap().unwrap();
    let c = b.first_child().unwrap().unwrap();
    assert!(matches!(c.append_child(&b), Err(Error::InvalidStructure(_))));
    // Nothing moved.
    assert_eq!(doc.to_xml(), "<a><b><c/></b></a>");
}

#[test]
fn test_handles_work_across_threads() {
    let doc = Document::parse_str("<a><b>34</b><c>55</c></a>").unwrap();
    let root = doc.root_element().unwrap();

    let mut workers = Vec::new();
    for _ in 0..4 {
        let root = root.clone();
        workers.push(thread::spawn(move || {
            let mut total = 0u32;
            for child in root.children().unwrap() {
                total += child.text_content().unwrap().parse::<u32>().unwrap();
            }
            total
        }));
    }
    for worker in workers {
        assert_eq!(worker.join().unwrap(), 89);
    }
}

#[test]
fn test_document_can_move_to_another_thread() {
    let doc = Document::parse_str("<a><b/></a>").unwrap();
    let b = doc.root_element().unwrap().first_child().unwrap().unwrap();

    let handle = thread::spawn(move || {
        b.set_attribute("touched", "yes").unwrap();
    });
    handle.join().unwrap();

    assert_eq!(doc.to_xml(), "<a><b touched=\"yes\"/></a>");
}

#[test]
fn test_concurrent_mutation_does_not_lose_updates() {
    let doc = Document::parse_str("<counters/>").unwrap();
    let root = doc.root_element().unwrap();

    let mut workers = Vec::new();
    for i in 0..8 {
        let doc = doc.clone();
        let root = root.clone();
        workers.push(thread::spawn(move || {
            let el = doc.create_element("hit").unwrap();
            el.set_attribute("worker", &i.to_string()).unwrap();
            root.append_child(&el).unwrap();
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(root.children().unwrap().len(), 8);
}

#[test]
fn test_node_types_are_reported() {
    let doc = Document::parse_str("<a>t<![CDATA[x]]><!--c--><?p?></a>").unwrap();
    let kinds: Vec<NodeType> = doc
        .root_element()
        .unwrap()
        .children()
        .unwrap()
        .iter()
        .map(|n| n.node_type().unwrap())
        .collect();
    assert_eq!(
        kinds,
        [
            NodeType::Text,
            NodeType::CData,
            NodeType::Comment,
            NodeType::ProcessingInstruction
        ]
    );
}
