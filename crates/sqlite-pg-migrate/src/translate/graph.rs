//! Foreign-key dependency ordering.
//!
//! Edge A -> B when A references B; B must be created (and populated) first.
//! The sort is Kahn's algorithm with ties broken by source order, so the same
//! schema always yields the same creation order.

use std::collections::HashMap;

use crate::core::schema::Table;
use crate::error::{Result, SchemaError};

/// Order `tables` so that every table comes after the tables it references.
///
/// Self-references are ignored. A reference to a table missing from `tables`
/// fails with [`SchemaError::UnknownReference`]; a cycle fails with
/// [`SchemaError::CyclicDependency`] naming the tables on the cycle.
pub fn creation_order(tables: &[Table]) -> Result<Vec<usize>> {
    let index: HashMap<String, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.to_lowercase(), i))
        .collect();

    // deps[i] = tables that i references
    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];
    for (i, table) in tables.iter().enumerate() {
        for referenced in table.referenced_tables() {
            match index.get(&referenced.to_lowercase()) {
                Some(&j) => deps[i].push(j),
                None => {
                    return Err(SchemaError::UnknownReference {
                        table: table.name.clone(),
                        referenced: referenced.to_string(),
                    }
                    .into())
                }
            }
        }
    }

    let mut remaining: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];
    for (i, ds) in deps.iter().enumerate() {
        for &d in ds {
            dependents[d].push(i);
        }
    }

    let mut order = Vec::with_capacity(tables.len());
    let mut placed = vec![false; tables.len()];
    // Repeatedly take the first ready table in source order.
    while order.len() < tables.len() {
        let Some(next) = (0..tables.len()).find(|&i| !placed[i] && remaining[i] == 0) else {
            let cycle = find_cycle(&deps, &placed);
            let names = cycle.iter().map(|&i| tables[i].name.clone()).collect();
            return Err(SchemaError::CyclicDependency(names).into());
        };
        placed[next] = true;
        order.push(next);
        for &dep in &dependents[next] {
            remaining[dep] -= 1;
        }
    }

    Ok(order)
}

/// Walk unplaced tables until one repeats; returns the cycle, closed
/// (first name repeated at the end).
fn find_cycle(deps: &[Vec<usize>], placed: &[bool]) -> Vec<usize> {
    let Some(start) = (0..deps.len()).find(|&i| !placed[i]) else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut current = start;
    loop {
        // Every unplaced table has at least one unplaced dependency.
        let Some(&next) = deps[current].iter().find(|&&d| !placed[d]) else {
            return path;
        };
        if let Some(pos) = path.iter().position(|&p| p == next) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(next);
            return cycle;
        }
        path.push(next);
        current = next;
    }
}
