//! Query-string rendering of find options.

use crate::encode_component;
use crate::model::ModelDescriptor;
use crate::options::FindOptions;

fn push_param(url: &mut String, key: &str, value: &str) {
    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(&encode_component(key));
    url.push('=');
    url.push_str(&encode_component(value));
}

/// Append filter, include, limit and sort parameters to `url`.
///
/// Limit and sort fall back to the model's defaults when the options leave
/// them unset.
pub fn url_options(url: &str, opts: &FindOptions, model: Option<&ModelDescriptor>) -> String {
    let mut out = url.to_string();

    for (field, values) in &opts.filter {
        for value in values {
            push_param(&mut out, field, value);
        }
    }

    for link in &opts.include {
        push_param(&mut out, "include", link);
    }

    let limit = opts.limit.or_else(|| model.and_then(|m| m.default_limit));
    if let Some(limit) = limit {
        push_param(&mut out, "limit", &limit.to_string());
    }

    let sort_by = opts
        .sort_by
        .as_deref()
        .or_else(|| model.and_then(|m| m.default_sort_by.as_deref()));
    if let Some(sort_by) = sort_by {
        push_param(&mut out, "sort", sort_by);
    }

    let order = opts
        .sort_order
        .as_deref()
        .or_else(|| model.and_then(|m| m.default_sort_order.as_deref()));
    if let Some(order) = order {
        push_param(&mut out, "order", order);
    }

    out
}
