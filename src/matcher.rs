//! Identity matching over already-fetched observed state. Never talks to the
//! remote service.
use crate::error::AmbiguityError;
use crate::model::{
    normalize_id, DatabaseSummary, MatchBy, MatchRule, PageSummary, PropertyValue, Record,
};

/// Zero matches is `None`; more than one is an ambiguity error.
fn at_most_one<'a, T, F>(
    observed: &'a [T],
    rule: impl FnOnce() -> String,
    id_of: F,
    pred: impl Fn(&T) -> bool,
) -> Result<Option<&'a T>, AmbiguityError>
where
    F: Fn(&T) -> &str,
{
    let hits: Vec<&T> = observed.iter().filter(|e| pred(e)).collect();
    match hits.len() {
        0 => Ok(None),
        1 => Ok(Some(hits[0])),
        _ => Err(AmbiguityError {
            rule: rule(),
            candidates: hits.iter().map(|e| id_of(e).to_string()).collect(),
        }),
    }
}

pub fn match_database<'a>(
    observed: &'a [DatabaseSummary],
    rule: &MatchRule,
) -> Result<Option<&'a DatabaseSummary>, AmbiguityError> {
    match rule.by {
        MatchBy::Title => at_most_one(
            observed,
            || format!("database title = '{}'", rule.value),
            |d| d.id.as_str(),
            |d| d.title == rule.value,
        ),
    }
}

pub fn match_record<'a>(
    observed: &'a [Record],
    property: &str,
    value: &PropertyValue,
) -> Result<Option<&'a Record>, AmbiguityError> {
    at_most_one(
        observed,
        || format!("record {} = '{}'", property, value.display()),
        |r| r.id.as_str(),
        |r| r.properties.get(property) == Some(value),
    )
}

pub fn match_page<'a>(
    observed: &'a [PageSummary],
    parent_page_id: &str,
    title: &str,
) -> Result<Option<&'a PageSummary>, AmbiguityError> {
    let parent = normalize_id(parent_page_id);
    at_most_one(
        observed,
        || format!("page '{}' under {}", title, parent_page_id),
        |p| p.id.as_str(),
        |p| p.title == title && normalize_id(&p.parent_page_id) == parent,
    )
}
