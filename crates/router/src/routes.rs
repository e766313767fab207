//! Ordered, segment-based route table.
//!
//! | # | Path                     | Query   | Target                          |
//! |---|--------------------------|---------|---------------------------------|
//! | 0 | `/`                      |         | host entry document             |
//! | 1 | `/{kind}/{id}`           | raw     | resource bytes                  |
//! | 2 | `/{kind}/{id}`           |         | host entry document             |
//! | 3 | `/{kind}/{id}/{rest..}`  |         | asset `rest` under the host root |
//! | 4 | `/{rest..}`              |         | asset `rest` under the host root |
//!
//! `{kind}` only matches a known [`ResourceKind`], so ordinary asset
//! directories fall through to row 4. The first matching row wins.

use stash_catalog::ResourceKind;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    EntryDocument,
    Resource { kind: ResourceKind, id: String },
    /// Asset path relative to the host's root.
    Asset(PathBuf),
}

#[derive(Debug, Clone, Copy)]
enum Segment {
    Kind,
    Id,
    /// One or more trailing segments.
    Rest,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    EntryDocument,
    Resource,
    Asset,
}

struct Rule {
    pattern: &'static [Segment],
    requires_raw: bool,
    target: Target,
}

const ROUTES: &[Rule] = &[
    Rule { pattern: &[], requires_raw: false, target: Target::EntryDocument },
    Rule { pattern: &[Segment::Kind, Segment::Id], requires_raw: true, target: Target::Resource },
    Rule { pattern: &[Segment::Kind, Segment::Id], requires_raw: false, target: Target::EntryDocument },
    Rule { pattern: &[Segment::Kind, Segment::Id, Segment::Rest], requires_raw: false, target: Target::Asset },
    Rule { pattern: &[Segment::Rest], requires_raw: false, target: Target::Asset },
];

#[derive(Default)]
struct Captures<'a> {
    kind: Option<ResourceKind>,
    id: Option<&'a str>,
    rest: Vec<&'a str>,
}

/// Pick the route for a path split into its non-empty segments.
pub fn resolve(segments: &[&str], raw: bool) -> Option<Route> {
    ROUTES.iter().filter(|rule| raw || !rule.requires_raw).find_map(|rule| {
        let captures = capture(rule.pattern, segments)?;
        match rule.target {
            Target::EntryDocument => Some(Route::EntryDocument),
            Target::Resource => Some(Route::Resource { kind: captures.kind?, id: captures.id?.to_string() }),
            Target::Asset => Some(Route::Asset(captures.rest.iter().collect())),
        }
    })
}

fn capture<'a>(pattern: &[Segment], segments: &[&'a str]) -> Option<Captures<'a>> {
    let mut captures = Captures::default();
    let mut remaining = segments;
    for segment in pattern {
        match segment {
            Segment::Kind => {
                let (head, tail) = remaining.split_first()?;
                captures.kind = Some(head.parse().ok()?);
                remaining = tail;
            },
            Segment::Id => {
                let (head, tail) = remaining.split_first()?;
                captures.id = Some(head);
                remaining = tail;
            },
            Segment::Rest => {
                if remaining.is_empty() {
                    return None;
                }
                captures.rest = remaining.to_vec();
                remaining = &[];
            },
        }
    }
    remaining.is_empty().then_some(captures)
}
