//! Grammar simplification before automaton construction: inlining small anonymous
//! rules into their users, and merging rules that only differ in name.

use crate::grammar::{Conflicts, Rule, TermIdx, TermSet};

use fxhash::FxHashMap;

fn inlinable_rule(rules: &[Rule], i: usize, preserve: &[TermIdx], terms: &TermSet, inlinable: &FxHashMap<TermIdx, Vec<Rule>>) -> bool {
    let rule = &rules[i];
    let term = terms.get(rule.name);
    !term.interesting()
        && !rule.parts.contains(&rule.name)
        && rule.parts.len() < 3
        && !preserve.contains(&rule.name)
        && (rule.parts.len() == 1
            || rules
                .iter()
                .all(|other| other.skip == rule.skip || !other.parts.contains(&rule.name)))
        && !rule.parts.iter().any(|p| inlinable.contains_key(p))
        && !rules
            .iter()
            .enumerate()
            .any(|(j, other)| j != i && other.name == rule.name)
}

/// Splices the rules in `inlinable` into the places where their names are used
fn expand(
    rule: &Rule,
    at: usize,
    conflicts: Vec<Conflicts>,
    parts: Vec<TermIdx>,
    inlinable: &FxHashMap<TermIdx, Vec<Rule>>,
    terms: &mut TermSet,
    out: &mut Vec<Rule>,
) {
    if at == rule.parts.len() {
        out.push(terms.new_rule(rule.name, parts, conflicts, rule.skip));
        return;
    }
    let next = rule.parts[at];
    let replace = match inlinable.get(&next) {
        Some(replace) => replace,
        None => {
            let mut conflicts = conflicts;
            conflicts.push(rule.conflicts[at + 1].clone());
            let mut parts = parts;
            parts.push(next);
            expand(rule, at + 1, conflicts, parts, inlinable, terms, out);
            return;
        }
    };
    for inner in replace {
        let last = conflicts.len() - 1;
        let mut new_conflicts = conflicts[..last].to_vec();
        let after = &rule.conflicts[at + 1];
        if inner.parts.is_empty() {
            new_conflicts.push(conflicts[last].join(&inner.conflicts[0]).join(after));
        } else {
            new_conflicts.push(conflicts[last].join(&inner.conflicts[0]));
            new_conflicts.extend_from_slice(&inner.conflicts[1..inner.conflicts.len() - 1]);
            new_conflicts.push(after.join(&inner.conflicts[inner.conflicts.len() - 1]));
        }
        let mut new_parts = parts.clone();
        new_parts.extend_from_slice(&inner.parts);
        expand(rule, at + 1, new_conflicts, new_parts, inlinable, terms, out);
    }
}

pub fn inline_rules(mut rules: Vec<Rule>, preserve: &[TermIdx], terms: &mut TermSet) -> Vec<Rule> {
    for pass in 0.. {
        let mut inlinable: FxHashMap<TermIdx, Vec<Rule>> = Default::default();
        if pass == 0 {
            for rule in &rules {
                if !terms.get(rule.name).inline() || inlinable.contains_key(&rule.name) {
                    continue;
                }
                let group: Vec<Rule> = rules.iter().filter(|r| r.name == rule.name).cloned().collect();
                if group.iter().any(|r| r.parts.contains(&rule.name)) {
                    continue;
                }
                inlinable.insert(rule.name, group);
            }
        }
        for i in 0..rules.len() {
            if inlinable_rule(&rules, i, preserve, terms, &inlinable) {
                inlinable.insert(rules[i].name, vec![rules[i].clone()]);
            }
        }
        if inlinable.is_empty() {
            break;
        }
        log::trace!("Inlining {} rules (pass {})", inlinable.len(), pass);

        let mut new_rules = Vec::with_capacity(rules.len());
        for rule in &rules {
            if inlinable.contains_key(&rule.name) {
                continue;
            }
            if !rule.parts.iter().any(|p| inlinable.contains_key(p)) {
                new_rules.push(rule.clone());
                continue;
            }
            expand(rule, 0, vec![rule.conflicts[0].clone()], vec![], &inlinable, terms, &mut new_rules);
        }
        rules = new_rules;
    }
    rules
}

/// Rules for a name are contiguous. Two names whose rule groups are identical apart from
/// the name are merged, the later name replacing the earlier.
pub fn merge_rules(rules: Vec<Rule>, terms: &mut TermSet) -> Vec<Rule> {
    let mut groups: Vec<(usize, usize)> = vec![];
    let mut i = 0;
    while i < rules.len() {
        let start = i;
        let name = rules[i].name;
        i += 1;
        while i < rules.len() && rules[i].name == name {
            i += 1;
        }
        groups.push((start, i));
    }

    let mut merged: FxHashMap<TermIdx, TermIdx> = Default::default();
    for (g, (start, end)) in groups.iter().enumerate() {
        let name = rules[*start].name;
        if terms.get(name).interesting() {
            continue;
        }
        let size = end - start;
        for (other_start, other_end) in &groups[g + 1..] {
            let other = rules[*other_start].name;
            if other_end - other_start != size || terms.get(other).interesting() {
                continue;
            }
            let same = (0..size).all(|k| rules[start + k].cmp_no_name(&rules[other_start + k]).is_eq());
            if same {
                merged.insert(name, other);
            }
        }
    }
    if merged.is_empty() {
        return rules;
    }

    let mut result = Vec::with_capacity(rules.len());
    for rule in rules {
        if merged.contains_key(&rule.name) {
            continue;
        }
        if rule.parts.iter().any(|p| merged.contains_key(p)) {
            let parts = rule
                .parts
                .iter()
                .map(|p| merged.get(p).copied().unwrap_or(*p))
                .collect();
            result.push(terms.new_rule(rule.name, parts, rule.conflicts, rule.skip));
        } else {
            result.push(rule);
        }
    }
    result
}

pub fn simplify_rules(rules: Vec<Rule>, preserve: &[TermIdx], terms: &mut TermSet) -> Vec<Rule> {
    let before = rules.len();
    let rules = merge_rules(inline_rules(rules, preserve, terms), terms);
    log::debug!("Simplified {} rules to {}", before, rules.len());
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{Props, RuleDisplay};

    fn rule(terms: &mut TermSet, name: TermIdx, parts: &[TermIdx], skip: TermIdx) -> Rule {
        let conflicts = vec![Conflicts::none(); parts.len() + 1];
        terms.new_rule(name, parts.to_vec(), conflicts, skip)
    }

    fn show(rules: &[Rule], terms: &TermSet) -> Vec<String> {
        rules.iter().map(|r| RuleDisplay::new(r, terms).to_string()).collect()
    }

    #[test]
    fn inlines_anonymous_single_rules() {
        let mut terms = TermSet::new();
        let skip = terms.eof;
        let a = terms.make_terminal("a", None, Props::new());
        let b = terms.make_terminal("b", None, Props::new());
        let top = terms.make_top(Some("P".to_owned()), Props::new());
        let pair = terms.make_non_terminal("pair", None, Props::new());
        let rules = vec![
            rule(&mut terms, top, &[pair, pair], skip),
            rule(&mut terms, pair, &[a, b], skip),
        ];
        let result = inline_rules(rules, &[top], &mut terms);
        assert_eq!(show(&result, &terms), vec!["@top -> a b a b"]);
    }

    #[test]
    fn keeps_named_and_recursive_rules() {
        let mut terms = TermSet::new();
        let skip = terms.eof;
        let a = terms.make_terminal("a", None, Props::new());
        let top = terms.make_top(Some("P".to_owned()), Props::new());
        let named = terms.make_non_terminal("A", Some("A".to_owned()), Props::new());
        let list = terms.make_non_terminal("list", None, Props::new());
        let rules = vec![
            rule(&mut terms, top, &[named, list], skip),
            rule(&mut terms, named, &[a], skip),
            rule(&mut terms, list, &[list, a], skip),
            rule(&mut terms, list, &[a], skip),
        ];
        let result = inline_rules(rules.clone(), &[top], &mut terms);
        assert_eq!(show(&result, &terms), show(&rules, &terms));
    }

    #[test]
    fn inline_flag_inlines_choices() {
        let mut terms = TermSet::new();
        let skip = terms.eof;
        let a = terms.make_terminal("a", None, Props::new());
        let b = terms.make_terminal("b", None, Props::new());
        let top = terms.make_top(Some("P".to_owned()), Props::new());
        let either = terms.make_non_terminal("Either", Some("Either".to_owned()), Props::new());
        terms.get_mut(either).set_inline();
        let rules = vec![
            rule(&mut terms, top, &[either, a], skip),
            rule(&mut terms, either, &[a], skip),
            rule(&mut terms, either, &[b], skip),
        ];
        let result = inline_rules(rules, &[top], &mut terms);
        assert_eq!(show(&result, &terms), vec!["@top -> a a", "@top -> b a"]);
    }

    #[test]
    fn merges_identical_rules() {
        let mut terms = TermSet::new();
        let skip = terms.eof;
        let a = terms.make_terminal("a", None, Props::new());
        let b = terms.make_terminal("b", None, Props::new());
        let top = terms.make_top(Some("P".to_owned()), Props::new());
        let x = terms.make_non_terminal("x", None, Props::new());
        let y = terms.make_non_terminal("y", None, Props::new());
        let rules = vec![
            rule(&mut terms, top, &[x, y], skip),
            rule(&mut terms, x, &[a, x], skip),
            rule(&mut terms, x, &[b], skip),
            rule(&mut terms, y, &[a, x], skip),
            rule(&mut terms, y, &[b], skip),
        ];
        let result = merge_rules(rules, &mut terms);
        assert_eq!(show(&result, &terms), vec!["@top -> y y", "y -> a y", "y -> b"]);
    }
}
