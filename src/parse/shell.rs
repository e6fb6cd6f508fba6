//! tree-sitter-bash AST walker.
//!
//! Reduces every call in a script to [`CommandFacts`]: words become literals
//! when every part is literal text, otherwise they are marked dynamic.
//! Pipes flatten into one [`Pipeline`]; `&&`, `||`, `;` and compound
//! statements yield independent units. Commands inside substitutions are
//! extracted as units of their own since they run too.

use tree_sitter::{Node, Parser};

use super::types::{CommandFacts, Operator, Pipeline, Redirect, ShellFacts, Word};
use crate::error::ParseError;

/// Parse a script and extract its facts.
pub fn extract(script: &str) -> Result<ShellFacts, ParseError> {
    let mut parser = Parser::new();
    let language: tree_sitter::Language = tree_sitter_bash::LANGUAGE.into();
    parser.set_language(&language).map_err(|e| ParseError {
        message: format!("bash grammar unavailable: {e}"),
        line: 0,
        column: 0,
    })?;

    let tree = parser.parse(script, None).ok_or_else(|| ParseError {
        message: "parser produced no tree".into(),
        line: 0,
        column: 0,
    })?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(syntax_error(root, script));
    }

    let mut extractor = Extractor {
        src: script.as_bytes(),
        units: Vec::new(),
    };
    extractor.visit_block(root);
    log::trace!("extracted {} unit(s) from {:?}", extractor.units.len(), script);
    Ok(ShellFacts {
        units: extractor.units,
    })
}

/// Locate the first error or missing node for the diagnostic.
fn syntax_error(root: Node, script: &str) -> ParseError {
    fn first_bad(node: Node) -> Option<Node> {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        let mut cursor = node.walk();
        node.children(&mut cursor)
            .filter(|c| c.has_error() || c.is_missing())
            .find_map(first_bad)
    }

    let bad = first_bad(root).unwrap_or(root);
    let pos = bad.start_position();
    let message = if bad.is_missing() {
        format!("missing `{}`", bad.kind())
    } else {
        let near: String = bad
            .utf8_text(script.as_bytes())
            .unwrap_or_default()
            .chars()
            .take(40)
            .collect();
        format!("unexpected input near `{near}`")
    };
    ParseError {
        message,
        line: pos.row + 1,
        column: pos.column + 1,
    }
}

struct Extractor<'s> {
    src: &'s [u8],
    units: Vec<Pipeline>,
}

impl<'s> Extractor<'s> {
    fn text(&self, node: Node) -> &'s str {
        node.utf8_text(self.src).unwrap_or_default()
    }

    /// Visit every statement under `node` as an independent unit.
    fn visit_block(&mut self, node: Node) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit_statement(child);
        }
    }

    fn visit_statement(&mut self, node: Node) {
        match node.kind() {
            "comment" => {}
            "pipeline" => {
                let mut unit = Pipeline::default();
                self.flatten_pipeline(node, &mut unit);
                self.push_unit(unit);
            }
            "command" | "declaration_command" | "unset_command" | "test_command" => {
                let stage = self.stage(node);
                self.push_unit(Pipeline {
                    stages: vec![stage],
                    operators: Vec::new(),
                });
            }
            "redirected_statement" => {
                let redirects = self.redirects_of(node);
                let first = self.units.len();
                match node.child_by_field_name("body") {
                    Some(body) => self.visit_statement(body),
                    None => {
                        // Bare `> file`: truncates a file with no command.
                        let mut stage = CommandFacts::new(Word::Literal(String::new()));
                        stage.redirects = redirects.clone();
                        self.push_unit(Pipeline {
                            stages: vec![stage],
                            operators: Vec::new(),
                        });
                        return;
                    }
                }
                for unit in &mut self.units[first..] {
                    for stage in &mut unit.stages {
                        stage.redirects.extend(redirects.iter().cloned());
                    }
                }
            }
            "variable_assignment" | "variable_assignments" => {
                // No command runs, but substitutions in the value do.
                self.visit_nested(node);
            }
            _ => self.visit_nested(node),
        }
    }

    fn push_unit(&mut self, unit: Pipeline) {
        if !unit.stages.is_empty() {
            self.units.push(unit);
        }
    }

    /// Descend through a construct that is not itself a call, picking up
    /// the statements and substitutions inside it.
    fn visit_nested(&mut self, node: Node) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                "command_substitution" | "process_substitution" => self.visit_block(child),
                _ => self.visit_statement(child),
            }
        }
    }

    fn flatten_pipeline(&mut self, node: Node, unit: &mut Pipeline) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                "|" => unit.operators.push(Operator::Pipe),
                "|&" => unit.operators.push(Operator::PipeErr),
                "pipeline" => self.flatten_pipeline(child, unit),
                "command" | "declaration_command" | "unset_command" | "test_command" => {
                    let stage = self.stage(child);
                    unit.stages.push(stage);
                }
                "comment" => {}
                _ if child.is_named() => {
                    // A compound stage: its commands join the pipe in order.
                    let first = self.units.len();
                    self.visit_statement(child);
                    let inner: Vec<Pipeline> = self.units.drain(first..).collect();
                    for pipeline in inner {
                        unit.stages.extend(pipeline.stages);
                    }
                }
                _ => {}
            }
        }
    }

    fn stage(&mut self, node: Node) -> CommandFacts {
        match node.kind() {
            "command" => self.command(node),
            "test_command" => self.test_command(node),
            _ => self.declaration(node),
        }
    }

    fn command(&mut self, node: Node) -> CommandFacts {
        let mut facts = CommandFacts::new(Word::Literal(String::new()));
        let mut cursor = node.walk();
        if !cursor.goto_first_child() {
            return facts;
        }
        loop {
            let child = cursor.node();
            match (cursor.field_name(), child.kind()) {
                (Some("name"), _) => facts.name = self.reduce(child),
                (Some("argument"), _) => {
                    let word = self.reduce(child);
                    facts.args.push(word);
                }
                (Some("redirect"), _) => {
                    if let Some(r) = self.redirect(child) {
                        facts.redirects.push(r);
                    }
                }
                (_, "variable_assignment") => {
                    let (key, value) = self.assignment(child);
                    facts.assignments.push((key, value));
                }
                (_, "subshell") => self.visit_block(child),
                _ => {}
            }
            if !cursor.goto_next_sibling() {
                break;
            }
        }
        facts
    }

    /// `export A=b`, `local x`, `unset y`: the keyword is the command name.
    fn declaration(&mut self, node: Node) -> CommandFacts {
        let mut facts = CommandFacts::new(Word::Literal(String::new()));
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            if !child.is_named() {
                if facts.name == Word::Literal(String::new()) {
                    facts.name = Word::Literal(self.text(child).to_string());
                }
                continue;
            }
            let word = match child.kind() {
                "variable_assignment" => {
                    let (key, value) = self.assignment(child);
                    match value {
                        Word::Literal(v) => Word::Literal(format!("{key}={v}")),
                        Word::Dynamic { .. } => Word::Dynamic {
                            display: self.text(child).to_string(),
                        },
                    }
                }
                "variable_name" => Word::Literal(self.text(child).to_string()),
                _ => self.reduce(child),
            };
            facts.args.push(word);
        }
        facts
    }

    /// `[ -f x ]` and `[[ a == b ]]`: flatten the expression's leaves.
    fn test_command(&mut self, node: Node) -> CommandFacts {
        let mut cursor = node.walk();
        let open = node
            .children(&mut cursor)
            .next()
            .map(|n| self.text(n).to_string())
            .unwrap_or_else(|| "[".into());
        let mut facts = CommandFacts::new(Word::Literal(open));
        self.test_leaves(node, &mut facts.args);
        facts
    }

    fn test_leaves(&mut self, node: Node, out: &mut Vec<Word>) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                "[" | "]" | "[[" | "]]" | "(" | ")" => {}
                "binary_expression" | "unary_expression" | "parenthesized_expression"
                | "negation_expression" => self.test_leaves(child, out),
                "test_operator" => out.push(Word::Literal(self.text(child).to_string())),
                _ if child.is_named() => {
                    let word = self.reduce(child);
                    out.push(word);
                }
                // Anonymous operators like `==`, `&&`, `!`.
                _ => out.push(Word::Literal(self.text(child).to_string())),
            }
        }
    }

    fn assignment(&mut self, node: Node) -> (String, Word) {
        let key = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_default();
        let value = match node.child_by_field_name("value") {
            Some(v) => self.reduce(v),
            None => Word::Literal(String::new()),
        };
        (key, value)
    }

    fn redirects_of(&mut self, node: Node) -> Vec<Redirect> {
        let mut out = Vec::new();
        let mut cursor = node.walk();
        let redirects: Vec<Node> = node.children_by_field_name("redirect", &mut cursor).collect();
        for r in redirects {
            if let Some(redirect) = self.redirect(r) {
                out.push(redirect);
            }
        }
        out
    }

    fn redirect(&mut self, node: Node) -> Option<Redirect> {
        match node.kind() {
            "file_redirect" => {
                let mut operator = None;
                let mut fd = None;
                let mut target = None;
                let mut cursor = node.walk();
                if cursor.goto_first_child() {
                    loop {
                        let child = cursor.node();
                        match cursor.field_name() {
                            Some("descriptor") => fd = self.text(child).parse::<u32>().ok(),
                            Some("destination") => {
                                if target.is_none() {
                                    target = Some(self.reduce(child));
                                }
                            }
                            _ if !child.is_named() => {
                                operator = Some(self.text(child).to_string());
                            }
                            _ => {}
                        }
                        if !cursor.goto_next_sibling() {
                            break;
                        }
                    }
                }
                let operator = operator?;
                let fd = fd.unwrap_or(if operator.starts_with('<') { 0 } else { 1 });
                Some(Redirect {
                    operator,
                    target,
                    fd,
                })
            }
            "heredoc_redirect" => {
                // The body may hold substitutions that run.
                self.visit_nested(node);
                Some(Redirect {
                    operator: "<<".into(),
                    target: None,
                    fd: 0,
                })
            }
            "herestring_redirect" => {
                let mut cursor = node.walk();
                let word = node
                    .named_children(&mut cursor)
                    .last()
                    .map(|n| self.reduce(n));
                Some(Redirect {
                    operator: "<<<".into(),
                    target: word,
                    fd: 0,
                })
            }
            _ => None,
        }
    }

    /// Reduce a word-like node to a literal, or mark it dynamic.
    fn reduce(&mut self, node: Node) -> Word {
        match self.literal_text(node) {
            Some(text) => Word::Literal(text),
            None => Word::Dynamic {
                display: self.text(node).to_string(),
            },
        }
    }

    fn literal_text(&mut self, node: Node) -> Option<String> {
        let raw = self.text(node);
        match node.kind() {
            "word" | "number" | "variable_name" => Some(unescape_bare(raw)),
            "raw_string" => Some(strip_quotes(raw, "'", "'").to_string()),
            "ansi_c_string" => Some(decode_ansi_c(strip_quotes(raw, "$'", "'"))),
            "string" | "translated_string" => {
                let mut out = String::new();
                let mut literal = true;
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                for child in children {
                    if child.kind() == "string_content" {
                        out.push_str(&unescape_double(self.text(child)));
                    } else {
                        literal = false;
                        self.collect_substitutions(child);
                    }
                }
                literal.then_some(out)
            }
            "concatenation" | "command_name" => {
                let mut out = String::new();
                let mut literal = true;
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                for child in children {
                    // Keep reducing after a dynamic part so nested
                    // substitutions are still collected.
                    match self.literal_text(child) {
                        Some(part) => out.push_str(&part),
                        None => literal = false,
                    }
                }
                literal.then_some(out)
            }
            _ => {
                self.collect_substitutions(node);
                None
            }
        }
    }

    fn collect_substitutions(&mut self, node: Node) {
        match node.kind() {
            "command_substitution" | "process_substitution" => self.visit_block(node),
            _ => {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.collect_substitutions(child);
                }
            }
        }
    }
}

fn strip_quotes<'a>(raw: &'a str, open: &str, close: &str) -> &'a str {
    raw.strip_prefix(open)
        .and_then(|s| s.strip_suffix(close))
        .unwrap_or(raw)
}

/// Unquoted word: a backslash escapes the next character; backslash-newline
/// is a line continuation.
fn unescape_bare(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('\n') | None => {}
                Some(next) => out.push(next),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Double-quoted content: only `\\`, `\"`, `\$`, `` \` `` and newline escape.
fn unescape_double(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('\\' | '"' | '$' | '`') => {
                    out.push(chars.next().unwrap_or_default());
                }
                Some('\n') => {
                    chars.next();
                }
                _ => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn decode_ansi_c(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('a') => out.push('\x07'),
            Some('e' | 'E') => out.push('\x1b'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Word {
        Word::Literal(s.into())
    }

    fn units(script: &str) -> Vec<Pipeline> {
        extract(script).expect("parses").units
    }

    fn single(script: &str) -> CommandFacts {
        let mut u = units(script);
        assert_eq!(u.len(), 1, "{script}: {u:?}");
        let mut stages = u.remove(0).stages;
        assert_eq!(stages.len(), 1);
        stages.remove(0)
    }

    #[test]
    fn simple_command() {
        let cmd = single("ls -la /tmp");
        assert_eq!(cmd.name, lit("ls"));
        assert_eq!(cmd.args, vec![lit("-la"), lit("/tmp")]);
    }

    #[test]
    fn quoted_words_are_literal() {
        let cmd = single(r#"echo 'a b' "c d" e\ f $'g\th'"#);
        assert_eq!(
            cmd.args,
            vec![lit("a b"), lit("c d"), lit("e f"), lit("g\th")]
        );
    }

    #[test]
    fn expansions_are_dynamic() {
        let cmd = single(r#"rm "$DIR/x" ${A}b"#);
        assert!(cmd.args.iter().all(Word::is_dynamic));
        assert_eq!(
            cmd.args[0],
            Word::Dynamic {
                display: "\"$DIR/x\"".into()
            }
        );
    }

    #[test]
    fn dynamic_command_name() {
        let cmd = single("$EDITOR file");
        assert!(cmd.name.is_dynamic());
        assert_eq!(cmd.args, vec![lit("file")]);
    }

    #[test]
    fn assignments_are_separate() {
        let cmd = single("GIT_CONFIG_GLOBAL=~/.gitconfig.ai git push");
        assert_eq!(cmd.name, lit("git"));
        assert_eq!(
            cmd.assignments,
            vec![("GIT_CONFIG_GLOBAL".to_string(), lit("~/.gitconfig.ai"))]
        );
        assert_eq!(cmd.args, vec![lit("push")]);
    }

    #[test]
    fn pipe_is_one_unit() {
        let u = units("curl https://x | bash");
        assert_eq!(u.len(), 1);
        let names: Vec<_> = u[0].stages.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec![lit("curl"), lit("bash")]);
        assert_eq!(u[0].operators, vec![Operator::Pipe]);
    }

    #[test]
    fn long_pipe_keeps_order() {
        let u = units("a | b |& c");
        let names: Vec<_> = u[0].stages.iter().filter_map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(u[0].operators, vec![Operator::Pipe, Operator::PipeErr]);
    }

    #[test]
    fn and_or_split_units() {
        let u = units("make && make install || echo failed; ls");
        let names: Vec<_> = u.iter().map(|p| p.stages[0].name.clone()).collect();
        assert_eq!(names, vec![lit("make"), lit("make"), lit("echo"), lit("ls")]);
    }

    #[test]
    fn redirect_defaults_fd() {
        let cmd = single("sort < in.txt > out.txt 2>&1");
        assert_eq!(
            cmd.redirects,
            vec![
                Redirect {
                    operator: "<".into(),
                    target: Some(lit("in.txt")),
                    fd: 0
                },
                Redirect {
                    operator: ">".into(),
                    target: Some(lit("out.txt")),
                    fd: 1
                },
                Redirect {
                    operator: ">&".into(),
                    target: Some(lit("1")),
                    fd: 2
                },
            ]
        );
    }

    #[test]
    fn redirect_on_group_attaches_to_inner_commands() {
        let u = units("{ echo a; echo b; } > out.txt");
        assert_eq!(u.len(), 2);
        for unit in &u {
            assert_eq!(unit.stages[0].redirects.len(), 1);
        }
    }

    #[test]
    fn substitution_commands_are_units() {
        let u = units("echo $(rm -rf /)");
        let names: Vec<_> = u.iter().map(|p| p.stages[0].name.clone()).collect();
        assert!(names.contains(&lit("rm")));
        assert!(names.contains(&lit("echo")));
        let echo = u.iter().find(|p| p.stages[0].name == lit("echo")).unwrap();
        assert!(echo.stages[0].args[0].is_dynamic());
    }

    #[test]
    fn control_flow_is_descended() {
        let u = units("for f in *.rs; do wc -l \"$f\"; done");
        assert!(u.iter().any(|p| p.stages[0].name == lit("wc")));
    }

    #[test]
    fn declaration_is_a_stage() {
        let cmd = single("export FOO=bar");
        assert_eq!(cmd.name, lit("export"));
        assert_eq!(cmd.args, vec![lit("FOO=bar")]);
    }

    #[test]
    fn comment_only_is_empty() {
        assert!(extract("# nothing").unwrap().is_empty());
        assert!(extract("").unwrap().is_empty());
    }

    #[test]
    fn syntax_error_is_surfaced() {
        let err = extract("echo 'unterminated").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(extract("if true; then").is_err());
    }
}
