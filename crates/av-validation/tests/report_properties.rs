//! Property tests for report tree evaluation over synthetic policy trees.

use av_validation::{parse_report, Outcome, PolicyKind, PolicyNode, ReportNode, RuleResult};
use proptest::prelude::*;
use proptest::sample::Index;

fn rule_strategy() -> impl Strategy<Value = ReportNode> {
    ("[a-z][a-z0-9]{0,7}", any::<bool>()).prop_map(|(name, pass)| {
        ReportNode::Rule(RuleResult {
            name,
            outcome: if pass { Outcome::Pass } else { Outcome::Fail },
            actual: None,
            expected: None,
            operator: None,
            tracktype: None,
            field: None,
            occurrence: None,
        })
    })
}

fn kind_strategy() -> impl Strategy<Value = PolicyKind> {
    prop_oneof![Just(PolicyKind::And), Just(PolicyKind::Or)]
}

fn reported_strategy() -> impl Strategy<Value = Option<Outcome>> {
    prop_oneof![Just(None), Just(Some(Outcome::Pass)), Just(Some(Outcome::Fail))]
}

/// Any node no deeper than `depth + 1` levels.
fn node_strategy(depth: u32) -> BoxedStrategy<ReportNode> {
    if depth == 0 {
        return rule_strategy().boxed();
    }
    prop_oneof![
        1 => rule_strategy(),
        2 => (
            "[A-Z][a-z]{0,7}",
            kind_strategy(),
            reported_strategy(),
            prop::collection::vec(node_strategy(depth - 1), 0..4),
        )
            .prop_map(|(name, kind, reported, children)| {
                ReportNode::Policy(PolicyNode {
                    name,
                    kind,
                    reported,
                    children,
                })
            }),
    ]
    .boxed()
}

/// A policy node at least `min_depth` levels deep.
fn deep_policy_strategy(min_depth: u32) -> BoxedStrategy<ReportNode> {
    if min_depth <= 1 {
        return node_strategy(2);
    }
    (
        "[A-Z][a-z]{0,7}",
        kind_strategy(),
        reported_strategy(),
        deep_policy_strategy(min_depth - 1),
        prop::collection::vec(node_strategy(2), 0..3),
        any::<Index>(),
    )
        .prop_map(|(name, kind, reported, deep, mut others, at)| {
            let pos = at.index(others.len() + 1);
            others.insert(pos, deep);
            ReportNode::Policy(PolicyNode {
                name,
                kind,
                reported,
                children: others,
            })
        })
        .boxed()
}

/// Independent statement of the evaluation rules.
fn expected_pass(node: &ReportNode) -> bool {
    match node {
        ReportNode::Rule(rule) => rule.outcome == Outcome::Pass,
        ReportNode::Policy(policy) => {
            let mut results = policy.children.iter().map(expected_pass);
            match policy.kind {
                PolicyKind::And => results.all(|pass| pass),
                PolicyKind::Or => results.any(|pass| pass),
            }
        }
    }
}

fn render(node: &ReportNode, out: &mut String) {
    match node {
        ReportNode::Rule(rule) => {
            let outcome = match (rule.outcome, rule.name.len() % 3) {
                (Outcome::Fail, _) => "fail",
                (Outcome::Pass, 0) => "pass",
                (Outcome::Pass, 1) => "warn",
                (Outcome::Pass, _) => "info",
            };
            out.push_str(&format!(r#"<rule name="{}" outcome="{}"/>"#, rule.name, outcome));
        }
        ReportNode::Policy(policy) => {
            let kind = match policy.kind {
                PolicyKind::And => "and",
                PolicyKind::Or => "or",
            };
            out.push_str(&format!(r#"<policy name="{}" type="{}""#, policy.name, kind));
            if let Some(reported) = policy.reported {
                out.push_str(&format!(r#" outcome="{}""#, reported.as_str()));
            }
            out.push('>');
            for child in &policy.children {
                render(child, out);
            }
            out.push_str("</policy>");
        }
    }
}

fn document(tree: &ReportNode) -> String {
    let mut body = String::new();
    render(tree, &mut body);
    format!(
        r#"<?xml version="1.0"?><MediaConch xmlns="https://mediaarea.net/mediaconch" version="0.3"><media ref="f">{body}</media></MediaConch>"#
    )
}

fn strip_reported(node: &ReportNode) -> ReportNode {
    match node {
        ReportNode::Rule(rule) => ReportNode::Rule(rule.clone()),
        ReportNode::Policy(policy) => ReportNode::Policy(PolicyNode {
            name: policy.name.clone(),
            kind: policy.kind,
            reported: None,
            children: policy.children.iter().map(strip_reported).collect(),
        }),
    }
}

proptest! {
    #[test]
    fn evaluation_matches_and_or_semantics(tree in deep_policy_strategy(3)) {
        prop_assert!(tree.depth() >= 3);
        prop_assert_eq!(tree.evaluate() == Outcome::Pass, expected_pass(&tree));
    }

    #[test]
    fn reported_outcomes_never_change_the_result(tree in deep_policy_strategy(3)) {
        prop_assert_eq!(tree.evaluate(), strip_reported(&tree).evaluate());
    }

    #[test]
    fn passing_trees_report_no_failures(tree in deep_policy_strategy(3)) {
        if tree.evaluate() == Outcome::Pass {
            prop_assert!(tree.failures().is_empty());
        }
    }

    #[test]
    fn parsed_documents_evaluate_like_the_tree(tree in deep_policy_strategy(3)) {
        let parsed = parse_report(&document(&tree)).unwrap();
        prop_assert_eq!(&parsed, &tree);
        prop_assert_eq!(parsed.evaluate(), tree.evaluate());
        prop_assert_eq!(parsed.failures(), tree.failures());
    }
}
