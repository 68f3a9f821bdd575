use std::collections::{BTreeMap, BTreeSet};

/// SLR(1) construction over the classic expression grammar — the lab
/// counterpart to the LL(1) module, exercised by `--dump-slr`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Production {
    pub lhs: &'static str,
    pub rhs: Vec<&'static str>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Item {
    pub production: usize,
    pub dot: usize,
}

#[derive(Clone, Debug)]
pub struct SlrArtifacts {
    pub productions: Vec<Production>,
    pub states: Vec<BTreeSet<Item>>,
    pub action: BTreeMap<(usize, &'static str), String>,
    pub goto_table: BTreeMap<(usize, &'static str), usize>,
    pub follow: BTreeMap<&'static str, BTreeSet<&'static str>>,
    pub conflicts: Vec<(usize, &'static str, String, String)>,
}

pub fn build_demo_slr() -> SlrArtifacts {
    let productions = vec![
        Production { lhs: "S'", rhs: vec!["E"] },
        Production { lhs: "E", rhs: vec!["E", "+", "T"] },
        Production { lhs: "E", rhs: vec!["T"] },
        Production { lhs: "T", rhs: vec!["T", "*", "F"] },
        Production { lhs: "T", rhs: vec!["F"] },
        Production { lhs: "F", rhs: vec!["(", "E", ")"] },
        Production { lhs: "F", rhs: vec!["id"] },
    ];
    let nonterminals: BTreeSet<&'static str> = ["S'", "E", "T", "F"].into();
    let terminals: BTreeSet<&'static str> = ["+", "*", "(", ")", "id", "$"].into();

    let closure = |items: &BTreeSet<Item>| -> BTreeSet<Item> {
        let mut out = items.clone();
        let mut changed = true;
        while changed {
            changed = false;
            for item in out.clone() {
                let production = &productions[item.production];
                let Some(&symbol) = production.rhs.get(item.dot) else {
                    continue;
                };
                if !nonterminals.contains(symbol) {
                    continue;
                }
                for (index, candidate) in productions.iter().enumerate() {
                    if candidate.lhs == symbol {
                        let new_item = Item {
                            production: index,
                            dot: 0,
                        };
                        if out.insert(new_item) {
                            changed = true;
                        }
                    }
                }
            }
        }
        out
    };

    let goto = |items: &BTreeSet<Item>, symbol: &str| -> BTreeSet<Item> {
        let moved: BTreeSet<Item> = items
            .iter()
            .filter(|item| productions[item.production].rhs.get(item.dot) == Some(&symbol))
            .map(|item| Item {
                production: item.production,
                dot: item.dot + 1,
            })
            .collect();
        if moved.is_empty() {
            moved
        } else {
            closure(&moved)
        }
    };

    let mut states: Vec<BTreeSet<Item>> = vec![closure(&BTreeSet::from([Item {
        production: 0,
        dot: 0,
    }]))];
    let mut transitions: BTreeMap<(usize, &'static str), usize> = BTreeMap::new();

    let symbols: Vec<&'static str> = terminals
        .iter()
        .filter(|&&t| t != "$")
        .chain(nonterminals.iter())
        .copied()
        .collect();

    let mut queue = vec![0usize];
    while let Some(index) = queue.pop() {
        for &symbol in &symbols {
            let target = goto(&states[index], symbol);
            if target.is_empty() {
                continue;
            }
            let target_index = match states.iter().position(|s| *s == target) {
                Some(existing) => existing,
                None => {
                    states.push(target);
                    queue.push(states.len() - 1);
                    states.len() - 1
                }
            };
            transitions.insert((index, symbol), target_index);
        }
    }

    let follow = follow_sets(&productions, "S'");
    let mut action: BTreeMap<(usize, &'static str), String> = BTreeMap::new();
    let mut goto_table: BTreeMap<(usize, &'static str), usize> = BTreeMap::new();
    let mut conflicts = vec![];

    for (state_index, state) in states.iter().enumerate() {
        for item in state {
            let production = &productions[item.production];
            if let Some(&symbol) = production.rhs.get(item.dot) {
                let Some(&target) = transitions.get(&(state_index, symbol)) else {
                    continue;
                };
                if terminals.contains(symbol) {
                    set_action(
                        &mut action,
                        &mut conflicts,
                        state_index,
                        symbol,
                        format!("s{}", target),
                    );
                } else {
                    goto_table.insert((state_index, symbol), target);
                }
                continue;
            }

            if production.lhs == "S'" {
                set_action(
                    &mut action,
                    &mut conflicts,
                    state_index,
                    "$",
                    "acc".to_owned(),
                );
                continue;
            }

            for &terminal in &follow[production.lhs] {
                set_action(
                    &mut action,
                    &mut conflicts,
                    state_index,
                    terminal,
                    format!("r{}", item.production),
                );
            }
        }
    }

    SlrArtifacts {
        productions,
        states,
        action,
        goto_table,
        follow,
        conflicts,
    }
}

fn set_action(
    table: &mut BTreeMap<(usize, &'static str), String>,
    conflicts: &mut Vec<(usize, &'static str, String, String)>,
    state: usize,
    symbol: &'static str,
    value: String,
) {
    match table.get(&(state, symbol)) {
        Some(existing) if *existing != value => {
            conflicts.push((state, symbol, existing.clone(), value));
        }
        _ => {
            table.insert((state, symbol), value);
        }
    }
}

fn follow_sets(
    productions: &[Production],
    start: &'static str,
) -> BTreeMap<&'static str, BTreeSet<&'static str>> {
    let nonterminals: BTreeSet<&'static str> = productions.iter().map(|p| p.lhs).collect();

    let mut first: BTreeMap<&'static str, BTreeSet<&'static str>> =
        nonterminals.iter().map(|&nt| (nt, BTreeSet::new())).collect();
    let mut changed = true;
    while changed {
        changed = false;
        for production in productions {
            let Some(&head) = production.rhs.first() else {
                continue;
            };
            let additions: BTreeSet<&'static str> = if nonterminals.contains(head) {
                first[head].clone()
            } else {
                BTreeSet::from([head])
            };
            let entry = first.get_mut(production.lhs).unwrap();
            let before = entry.len();
            entry.extend(additions);
            if entry.len() != before {
                changed = true;
            }
        }
    }

    let mut follow: BTreeMap<&'static str, BTreeSet<&'static str>> =
        nonterminals.iter().map(|&nt| (nt, BTreeSet::new())).collect();
    follow.get_mut(start).unwrap().insert("$");

    let mut changed = true;
    while changed {
        changed = false;
        for production in productions {
            for (i, &symbol) in production.rhs.iter().enumerate() {
                if !nonterminals.contains(symbol) {
                    continue;
                }
                let additions: BTreeSet<&'static str> = match production.rhs.get(i + 1) {
                    None => follow[production.lhs].clone(),
                    Some(&next) if nonterminals.contains(next) => first[next].clone(),
                    Some(&next) => BTreeSet::from([next]),
                };
                let entry = follow.get_mut(symbol).unwrap();
                let before = entry.len();
                entry.extend(additions);
                if entry.len() != before {
                    changed = true;
                }
            }
        }
    }
    follow
}

pub fn slr_parse_trace(tokens: &[&'static str], artifacts: &SlrArtifacts) -> Vec<String> {
    let mut stream: Vec<&'static str> = tokens.to_vec();
    if stream.last() != Some(&"$") {
        stream.push("$");
    }

    let mut stack: Vec<usize> = vec![0];
    let mut index = 0;
    let mut trace = vec![];

    loop {
        let state = *stack.last().unwrap();
        let lookahead = stream.get(index).copied().unwrap_or("$");
        let action = artifacts.action.get(&(state, lookahead));
        trace.push(format!(
            "state={} lookahead={} action={}",
            state,
            lookahead,
            action.map(String::as_str).unwrap_or("none")
        ));

        let Some(action) = action else {
            trace.push("error".to_owned());
            break;
        };
        if action == "acc" {
            trace.push("accept".to_owned());
            break;
        }
        if let Some(target) = action.strip_prefix('s') {
            stack.push(target.parse().unwrap());
            index += 1;
            continue;
        }
        if let Some(production_index) = action.strip_prefix('r') {
            let production = &artifacts.productions[production_index.parse::<usize>().unwrap()];
            for _ in &production.rhs {
                stack.pop();
            }
            let top = *stack.last().unwrap();
            match artifacts.goto_table.get(&(top, production.lhs)) {
                Some(&next) => stack.push(next),
                None => {
                    trace.push("error goto-missing".to_owned());
                    break;
                }
            }
            trace.push(format!(
                "reduce {} -> {}",
                production.lhs,
                production.rhs.join(" ")
            ));
        }
    }
    trace
}

pub fn format_slr_artifacts(artifacts: &SlrArtifacts, parse_trace: Option<&[String]>) -> String {
    let mut lines = vec![];
    lines.push("SLR Demo Grammar Productions".to_owned());
    for (index, production) in artifacts.productions.iter().enumerate() {
        lines.push(format!(
            "  ({}) {} -> {}",
            index,
            production.lhs,
            production.rhs.join(" ")
        ));
    }
    lines.push(String::new());
    lines.push("FOLLOW sets".to_owned());
    for (nt, values) in &artifacts.follow {
        let values: Vec<&str> = values.iter().copied().collect();
        lines.push(format!("  FOLLOW({}) = {{ {} }}", nt, values.join(", ")));
    }
    lines.push(String::new());
    lines.push("LR(0) States".to_owned());
    for (index, state) in artifacts.states.iter().enumerate() {
        lines.push(format!("  I{}", index));
        for item in state {
            let production = &artifacts.productions[item.production];
            let mut rhs: Vec<&str> = production.rhs.clone();
            rhs.insert(item.dot, "·");
            lines.push(format!("    {} -> {}", production.lhs, rhs.join(" ")));
        }
    }
    lines.push(String::new());
    lines.push("ACTION table".to_owned());
    for ((state, symbol), value) in &artifacts.action {
        lines.push(format!("  ACTION[{}, {}] = {}", state, symbol, value));
    }
    lines.push(String::new());
    lines.push("GOTO table".to_owned());
    for ((state, symbol), target) in &artifacts.goto_table {
        lines.push(format!("  GOTO[{}, {}] = {}", state, symbol, target));
    }
    lines.push(String::new());
    lines.push("Conflicts".to_owned());
    if artifacts.conflicts.is_empty() {
        lines.push("  <none>".to_owned());
    } else {
        for (state, symbol, old, new) in &artifacts.conflicts {
            lines.push(format!("  ({}, {}) {} <-> {}", state, symbol, old, new));
        }
    }
    if let Some(trace) = parse_trace {
        lines.push(String::new());
        lines.push("Parse trace".to_owned());
        for row in trace {
            lines.push(format!("  {}", row));
        }
    }
    lines.join("\n") + "\n"
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_demo_grammar_is_conflict_free() {
        let artifacts = build_demo_slr();
        assert!(artifacts.conflicts.is_empty(), "{:?}", artifacts.conflicts);
        assert!(!artifacts.states.is_empty());
    }

    #[test]
    fn test_classic_expression_parses() {
        let artifacts = build_demo_slr();
        let trace = slr_parse_trace(&["id", "+", "id", "*", "id"], &artifacts);
        assert_eq!(trace.last().map(String::as_str), Some("accept"));
    }

    #[test]
    fn test_bad_input_errors() {
        let artifacts = build_demo_slr();
        let trace = slr_parse_trace(&["+", "id"], &artifacts);
        assert!(trace.iter().any(|row| row.starts_with("error")));
    }

    #[test]
    fn test_states_count_matches_classic_construction() {
        // The canonical LR(0) collection for this grammar has 12 states.
        let artifacts = build_demo_slr();
        assert_eq!(artifacts.states.len(), 12);
    }
}
