//! MediaConch XML report tree and its evaluation.
//!
//! A report is a tree of `policy` nodes (`and`/`or`) with `rule` leaves. The
//! tool's own outcome attributes on compound nodes are recorded but never
//! trusted: the file outcome is recomputed from the rule leaves.

use serde::{Deserialize, Serialize};

/// Pass/fail outcome of a rule, a policy node, or a whole file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
}

impl Outcome {
    /// `warn` and `info` are informational and count as pass.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pass" | "warn" | "info" => Some(Outcome::Pass),
            "fail" => Some(Outcome::Fail),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    And,
    Or,
}

/// A leaf rule result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleResult {
    pub name: String,
    pub outcome: Outcome,
    /// Value the tool measured.
    pub actual: Option<String>,
    /// Value compared against (element text).
    pub expected: Option<String>,
    pub operator: Option<String>,
    pub tracktype: Option<String>,
    /// Inspected field (`value` attribute).
    pub field: Option<String>,
    pub occurrence: Option<String>,
}

/// A compound `and`/`or` node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyNode {
    pub name: String,
    pub kind: PolicyKind,
    /// Outcome the tool reported for this node, if any.
    pub reported: Option<Outcome>,
    pub children: Vec<ReportNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "node", rename_all = "lowercase")]
pub enum ReportNode {
    Rule(RuleResult),
    Policy(PolicyNode),
}

/// A failing rule, flattened for notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleFailure {
    pub rule: String,
    pub actual: Option<String>,
    pub expected: Option<String>,
    pub operator: Option<String>,
    pub tracktype: Option<String>,
}

impl From<&RuleResult> for RuleFailure {
    fn from(rule: &RuleResult) -> Self {
        Self {
            rule: rule.name.clone(),
            actual: rule.actual.clone(),
            expected: rule.expected.clone(),
            operator: rule.operator.clone(),
            tracktype: rule.tracktype.clone(),
        }
    }
}

/// A compound node whose reported outcome disagrees with the computed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeMismatch {
    pub policy: String,
    pub reported: Outcome,
    pub computed: Outcome,
}

impl ReportNode {
    /// Computed outcome: AND of children for `and` (empty passes), OR of
    /// children for `or` (empty fails).
    pub fn evaluate(&self) -> Outcome {
        match self {
            ReportNode::Rule(rule) => rule.outcome,
            ReportNode::Policy(node) => {
                let pass = match node.kind {
                    PolicyKind::And => node.children.iter().all(|c| c.evaluate().is_pass()),
                    PolicyKind::Or => node.children.iter().any(|c| c.evaluate().is_pass()),
                };
                if pass {
                    Outcome::Pass
                } else {
                    Outcome::Fail
                }
            }
        }
    }

    /// Failing rules that explain a failing outcome, in document order.
    ///
    /// Only nodes that themselves evaluate to fail are descended into, so
    /// failing rules under a passing `or` branch are not reported.
    pub fn failures(&self) -> Vec<RuleFailure> {
        let mut out = Vec::new();
        self.collect_failures(&mut out);
        out
    }

    fn collect_failures(&self, out: &mut Vec<RuleFailure>) {
        match self {
            ReportNode::Rule(rule) => {
                if rule.outcome == Outcome::Fail {
                    out.push(RuleFailure::from(rule));
                }
            }
            ReportNode::Policy(node) => {
                if self.evaluate() == Outcome::Fail {
                    for child in &node.children {
                        child.collect_failures(out);
                    }
                }
            }
        }
    }

    pub fn reported_mismatches(&self) -> Vec<OutcomeMismatch> {
        let mut out = Vec::new();
        self.collect_mismatches(&mut out);
        out
    }

    fn collect_mismatches(&self, out: &mut Vec<OutcomeMismatch>) {
        if let ReportNode::Policy(node) = self {
            let computed = self.evaluate();
            if let Some(reported) = node.reported {
                if reported != computed {
                    out.push(OutcomeMismatch {
                        policy: node.name.clone(),
                        reported,
                        computed,
                    });
                }
            }
            for child in &node.children {
                child.collect_mismatches(out);
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            ReportNode::Rule(_) => 1,
            ReportNode::Policy(node) => {
                1 + node.children.iter().map(|c| c.depth()).max().unwrap_or(0)
            }
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("report is empty")]
    Empty,

    #[error("malformed XML: {0}")]
    Xml(String),

    #[error("missing <{0}> element")]
    MissingElement(&'static str),

    #[error("<{element}> is missing the {attribute} attribute")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("unknown policy type {0:?}")]
    UnknownPolicyType(String),

    #[error("unknown outcome {0:?}")]
    UnknownOutcome(String),

    #[error("unexpected <{0}> element in policy tree")]
    UnexpectedElement(String),
}

/// Parse a MediaConch XML report into its top-level policy node.
///
/// Accepts either a full `MediaConch/media/policy` document or a bare
/// `policy` root.
pub fn parse_report(xml: &str) -> Result<ReportNode, ReportError> {
    if xml.trim().is_empty() {
        return Err(ReportError::Empty);
    }
    let doc = roxmltree::Document::parse(xml).map_err(|e| ReportError::Xml(e.to_string()))?;
    let root = doc.root_element();

    let policy = if root.tag_name().name() == "policy" {
        root
    } else {
        let media = root
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "media")
            .ok_or(ReportError::MissingElement("media"))?;
        media
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "policy")
            .ok_or(ReportError::MissingElement("policy"))?
    };

    parse_node(policy)
}

fn parse_node(node: roxmltree::Node<'_, '_>) -> Result<ReportNode, ReportError> {
    let attr = |name: &str| node.attribute(name).map(str::to_string);

    match node.tag_name().name() {
        "rule" => {
            let raw = node.attribute("outcome").ok_or(ReportError::MissingAttribute {
                element: "rule",
                attribute: "outcome",
            })?;
            let outcome =
                Outcome::parse(raw).ok_or_else(|| ReportError::UnknownOutcome(raw.to_string()))?;
            let expected = node
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            Ok(ReportNode::Rule(RuleResult {
                name: attr("name").unwrap_or_default(),
                outcome,
                actual: attr("actual"),
                expected,
                operator: attr("operator"),
                tracktype: attr("tracktype"),
                field: attr("value"),
                occurrence: attr("occurrence"),
            }))
        }
        "policy" => {
            let raw_kind = node.attribute("type").ok_or(ReportError::MissingAttribute {
                element: "policy",
                attribute: "type",
            })?;
            let kind = match raw_kind.trim().to_ascii_lowercase().as_str() {
                "and" => PolicyKind::And,
                "or" => PolicyKind::Or,
                _ => return Err(ReportError::UnknownPolicyType(raw_kind.to_string())),
            };
            let reported = match node.attribute("outcome") {
                Some(raw) => Some(
                    Outcome::parse(raw).ok_or_else(|| ReportError::UnknownOutcome(raw.to_string()))?,
                ),
                None => None,
            };
            let children = node
                .children()
                .filter(|c| c.is_element())
                .filter(|c| matches!(c.tag_name().name(), "rule" | "policy"))
                .map(parse_node)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ReportNode::Policy(PolicyNode {
                name: attr("name").unwrap_or_default(),
                kind,
                reported,
                children,
            }))
        }
        other => Err(ReportError::UnexpectedElement(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIDEO_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MediaConch xmlns="https://mediaarea.net/mediaconch" version="0.3">
  <media ref="/scratch/x/data/x_ma.mkv">
    <policy name="RAC Video MA" type="and" rules_run="3" fail_count="1" pass_count="2" outcome="fail">
      <rule name="General/Format is Matroska" value="Format" tracktype="General" occurrence="*" operator="=" outcome="pass" actual="Matroska">Matroska</rule>
      <rule name="Video/Format is FFV1" value="Format" tracktype="Video" occurrence="*" operator="=" outcome="fail" actual="AVC">FFV1</rule>
      <policy name="Audio codec" type="or" outcome="pass">
        <rule name="Audio is PCM" value="Format" tracktype="Audio" operator="=" outcome="fail" actual="AAC">PCM</rule>
        <rule name="Audio is FLAC" value="Format" tracktype="Audio" operator="=" outcome="pass" actual="FLAC">FLAC</rule>
      </policy>
    </policy>
  </media>
</MediaConch>"#;

    fn rule(name: &str, outcome: Outcome) -> ReportNode {
        ReportNode::Rule(RuleResult {
            name: name.to_string(),
            outcome,
            actual: None,
            expected: None,
            operator: None,
            tracktype: None,
            field: None,
            occurrence: None,
        })
    }

    fn policy(kind: PolicyKind, children: Vec<ReportNode>) -> ReportNode {
        ReportNode::Policy(PolicyNode {
            name: "p".to_string(),
            kind,
            reported: None,
            children,
        })
    }

    #[test]
    fn parses_mediaconch_document() {
        let tree = parse_report(VIDEO_REPORT).unwrap();
        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.evaluate(), Outcome::Fail);

        let failures = tree.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].rule, "Video/Format is FFV1");
        assert_eq!(failures[0].actual.as_deref(), Some("AVC"));
        assert_eq!(failures[0].expected.as_deref(), Some("FFV1"));
        assert_eq!(failures[0].operator.as_deref(), Some("="));
        assert_eq!(failures[0].tracktype.as_deref(), Some("Video"));
    }

    #[test]
    fn warn_and_info_count_as_pass() {
        assert_eq!(Outcome::parse("warn"), Some(Outcome::Pass));
        assert_eq!(Outcome::parse("INFO"), Some(Outcome::Pass));
        assert_eq!(Outcome::parse("fail"), Some(Outcome::Fail));
        assert_eq!(Outcome::parse("maybe"), None);
    }

    #[test]
    fn empty_compound_nodes() {
        assert_eq!(policy(PolicyKind::And, vec![]).evaluate(), Outcome::Pass);
        assert_eq!(policy(PolicyKind::Or, vec![]).evaluate(), Outcome::Fail);
    }

    #[test]
    fn or_with_one_pass_passes_and_reports_nothing() {
        let tree = policy(
            PolicyKind::Or,
            vec![rule("a", Outcome::Fail), rule("b", Outcome::Pass)],
        );
        assert_eq!(tree.evaluate(), Outcome::Pass);
        assert!(tree.failures().is_empty());
    }

    #[test]
    fn computed_outcome_overrides_reported() {
        let xml = r#"<policy name="top" type="and" outcome="pass">
            <rule name="r" outcome="fail" actual="x">y</rule>
        </policy>"#;
        let tree = parse_report(xml).unwrap();
        assert_eq!(tree.evaluate(), Outcome::Fail);
        let mismatches = tree.reported_mismatches();
        assert_eq!(
            mismatches,
            vec![OutcomeMismatch {
                policy: "top".to_string(),
                reported: Outcome::Pass,
                computed: Outcome::Fail,
            }]
        );
    }

    #[test]
    fn malformed_reports_are_rejected() {
        assert_eq!(parse_report("   "), Err(ReportError::Empty));
        assert!(matches!(parse_report("<MediaConch>"), Err(ReportError::Xml(_))));
        assert_eq!(
            parse_report("<MediaConch></MediaConch>"),
            Err(ReportError::MissingElement("media"))
        );
        assert_eq!(
            parse_report("<MediaConch><media/></MediaConch>"),
            Err(ReportError::MissingElement("policy"))
        );
        assert_eq!(
            parse_report(r#"<policy type="xor"/>"#),
            Err(ReportError::UnknownPolicyType("xor".to_string()))
        );
        assert_eq!(
            parse_report(r#"<policy type="and"><rule outcome="n/a"/></policy>"#),
            Err(ReportError::UnknownOutcome("n/a".to_string()))
        );
    }
}
