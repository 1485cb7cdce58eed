//! Generic PEG interpreter with ordered choice, backtracking, labeled captures,
//! lookahead, optional memoization and farthest-failure diagnostics.
//!
//! A [`Grammar`] is plain data: a table of named [`Rule`]s whose bodies are
//! [`Expr`] trees. Semantic actions are function pointers that turn the labels
//! captured by their child expression into a [`Value`]. The grammar is validated
//! once when it is built and never mutated afterwards; every call to
//! [`Grammar::parse`] allocates its own cursor, capture scopes and memo table,
//! so one grammar can serve any number of concurrent parses.
//!
//! ```text
//! rule("digits", action(plus(class(CharClass::new().range('0', '9'))), text))
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, trace};

/// A location in the input. `line` and `column` are 1-based, `offset` is in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub const START: Position = Position {
        line: 1,
        column: 1,
        offset: 0,
    };

    fn advance(&mut self, c: char) {
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }

    /// Position of byte `offset` in `input`. Only the prefix before `offset` is
    /// decoded, so this works for inputs that are invalid past that point.
    pub fn locate(input: &[u8], offset: usize) -> Position {
        let end = offset.min(input.len());
        let prefix = std::str::from_utf8(&input[..end]).unwrap_or("");
        let mut pos = Position::START;
        for c in prefix.chars() {
            pos.advance(c);
        }
        pos
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::START
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} [{}]", self.line, self.column, self.offset)
    }
}

/// Semantic value produced while matching.
///
/// Terminals yield `Text`, sequences and repetitions yield `List`. Labels,
/// lookaheads and unmatched optionals yield `Nil`. `Node` carries whatever the
/// grammar's actions build.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<T> {
    Nil,
    Text(String),
    List(Vec<Value<T>>),
    Node(T),
}

impl<T> Value<T> {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_node(&self) -> Option<&T> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn into_node(self) -> Option<T> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    /// Concatenation of every `Text` reachable from this value.
    pub fn flatten_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Value::Text(s) => out.push_str(s),
            Value::List(items) => items.iter().for_each(|v| v.collect_text(out)),
            Value::Nil | Value::Node(_) => {}
        }
    }

    /// Items of a `List`; `Nil` is the empty list and any other value is a
    /// list of one.
    pub fn into_list(self) -> Vec<Value<T>> {
        match self {
            Value::List(items) => items,
            Value::Nil => Vec::new(),
            other => vec![other],
        }
    }

    /// Every `Node` reachable through nested lists, in order.
    pub fn into_nodes(self) -> Vec<T> {
        let mut out = Vec::new();
        self.collect_nodes(&mut out);
        out
    }

    fn collect_nodes(self, out: &mut Vec<T>) {
        match self {
            Value::Node(n) => out.push(n),
            Value::List(items) => items.into_iter().for_each(|v| v.collect_nodes(out)),
            Value::Nil | Value::Text(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassItem {
    Char(char),
    Range(char, char),
}

/// A character class such as `[a-z_]` or `[^\n]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharClass {
    items: Vec<ClassItem>,
    inverted: bool,
    ignore_case: bool,
}

impl CharClass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chars(mut self, chars: &str) -> Self {
        self.items.extend(chars.chars().map(ClassItem::Char));
        self
    }

    pub fn range(mut self, lo: char, hi: char) -> Self {
        self.items.push(ClassItem::Range(lo, hi));
        self
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }

    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    fn contains(&self, c: char) -> bool {
        self.items.iter().any(|item| match *item {
            ClassItem::Char(x) => x == c,
            ClassItem::Range(lo, hi) => lo <= c && c <= hi,
        })
    }

    /// Whether `c` is accepted, honouring inversion and case folding.
    pub fn matches(&self, c: char) -> bool {
        let hit = self.contains(c)
            || (self.ignore_case
                && (c.to_lowercase().any(|l| self.contains(l))
                    || c.to_uppercase().any(|u| self.contains(u))));
        hit != self.inverted
    }
}

fn escape_class_char(c: char, out: &mut String) {
    match c {
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        '\\' | ']' | '-' | '^' => {
            out.push('\\');
            out.push(c);
        }
        _ => out.push(c),
    }
}

impl fmt::Display for CharClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::from("[");
        if self.inverted {
            out.push('^');
        }
        for item in &self.items {
            match *item {
                ClassItem::Char(c) => escape_class_char(c, &mut out),
                ClassItem::Range(lo, hi) => {
                    escape_class_char(lo, &mut out);
                    out.push('-');
                    escape_class_char(hi, &mut out);
                }
            }
        }
        out.push(']');
        if self.ignore_case {
            out.push('i');
        }
        f.write_str(&out)
    }
}

/// Labels bound by an action's child expression, plus the raw text it matched.
/// The action owns the bound values and may move them out.
pub struct Captures<'a, T> {
    bindings: Vec<(&'a str, Value<T>)>,
    text: &'a str,
}

impl<'a, T> Captures<'a, T> {
    /// Most recent binding of `label`.
    pub fn get(&self, label: &str) -> Option<&Value<T>> {
        self.bindings
            .iter()
            .rev()
            .find(|(name, _)| *name == label)
            .map(|(_, value)| value)
    }

    /// Move the most recent binding of `label` out of the captures.
    pub fn take(&mut self, label: &str) -> Option<Value<T>> {
        let at = self.bindings.iter().rposition(|(name, _)| *name == label)?;
        Some(self.bindings.remove(at).1)
    }

    pub fn text(&self) -> &'a str {
        self.text
    }
}

/// Semantic action. An `Err` aborts the whole parse.
pub type Action<T> = fn(&mut Captures<'_, T>) -> Result<Value<T>, String>;

/// Reference to a rule by name; resolved to a table index when the grammar is built.
pub struct RuleRef {
    name: String,
    id: usize,
}

/// Parsing expression.
pub enum Expr<T> {
    Literal { text: String, ignore_case: bool },
    Class(CharClass),
    Any,
    Sequence(Vec<Expr<T>>),
    Choice(Vec<Expr<T>>),
    Optional(Box<Expr<T>>),
    ZeroOrMore(Box<Expr<T>>),
    OneOrMore(Box<Expr<T>>),
    And(Box<Expr<T>>),
    Not(Box<Expr<T>>),
    Label(String, Box<Expr<T>>),
    Rule(RuleRef),
    Action(Box<Expr<T>>, Action<T>),
}

fn write_list<T>(f: &mut fmt::Formatter<'_>, items: &[Expr<T>], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{item}")?;
    }
    f.write_str(")")
}

impl<T> fmt::Display for Expr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal { text, ignore_case } => {
                write!(f, "{text:?}{}", if *ignore_case { "i" } else { "" })
            }
            Expr::Class(class) => write!(f, "{class}"),
            Expr::Any => f.write_str("."),
            Expr::Sequence(items) => write_list(f, items, " "),
            Expr::Choice(items) => write_list(f, items, " / "),
            Expr::Optional(e) => write!(f, "{e}?"),
            Expr::ZeroOrMore(e) => write!(f, "{e}*"),
            Expr::OneOrMore(e) => write!(f, "{e}+"),
            Expr::And(e) => write!(f, "&{e}"),
            Expr::Not(e) => write!(f, "!{e}"),
            Expr::Label(name, e) => write!(f, "{name}:{e}"),
            Expr::Rule(r) => f.write_str(&r.name),
            Expr::Action(e, _) => write!(f, "{e} {{...}}"),
        }
    }
}

impl<T> fmt::Debug for Expr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({self})")
    }
}

pub fn lit<T>(text: &str) -> Expr<T> {
    Expr::Literal {
        text: text.to_string(),
        ignore_case: false,
    }
}

pub fn lit_i<T>(text: &str) -> Expr<T> {
    Expr::Literal {
        text: text.to_lowercase(),
        ignore_case: true,
    }
}

pub fn class<T>(class: CharClass) -> Expr<T> {
    Expr::Class(class)
}

pub fn any<T>() -> Expr<T> {
    Expr::Any
}

pub fn seq<T>(items: impl IntoIterator<Item = Expr<T>>) -> Expr<T> {
    Expr::Sequence(items.into_iter().collect())
}

pub fn choice<T>(items: impl IntoIterator<Item = Expr<T>>) -> Expr<T> {
    Expr::Choice(items.into_iter().collect())
}

pub fn opt<T>(e: Expr<T>) -> Expr<T> {
    Expr::Optional(Box::new(e))
}

pub fn star<T>(e: Expr<T>) -> Expr<T> {
    Expr::ZeroOrMore(Box::new(e))
}

pub fn plus<T>(e: Expr<T>) -> Expr<T> {
    Expr::OneOrMore(Box::new(e))
}

pub fn and<T>(e: Expr<T>) -> Expr<T> {
    Expr::And(Box::new(e))
}

pub fn not<T>(e: Expr<T>) -> Expr<T> {
    Expr::Not(Box::new(e))
}

/// Bind the value of `e` to `name` for the nearest enclosing action. The
/// labeled expression itself yields `Nil`.
pub fn label<T>(name: &str, e: Expr<T>) -> Expr<T> {
    Expr::Label(name.to_string(), Box::new(e))
}

pub fn rule<T>(name: &str) -> Expr<T> {
    Expr::Rule(RuleRef {
        name: name.to_string(),
        id: usize::MAX,
    })
}

pub fn action<T>(e: Expr<T>, run: Action<T>) -> Expr<T> {
    Expr::Action(Box::new(e), run)
}

/// Named grammar entry point.
#[derive(Debug)]
pub struct Rule<T> {
    pub name: String,
    /// Human-readable name reported instead of the rule's inner expectations.
    pub display_name: Option<String>,
    pub expr: Expr<T>,
}

impl<T> Rule<T> {
    pub fn new(name: &str, expr: Expr<T>) -> Self {
        Rule {
            name: name.to_string(),
            display_name: None,
            expr,
        }
    }

    pub fn display(mut self, display_name: &str) -> Self {
        self.display_name = Some(display_name.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrammarError {
    #[error("grammar has no rule")]
    Empty,
    #[error("duplicate rule `{0}`")]
    DuplicateRule(String),
    #[error("rule `{rule}` references undefined rule `{name}`")]
    UndefinedRule { rule: String, name: String },
}

fn list_join(list: &[String]) -> String {
    match list {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} or {}", init.join(", "), last),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("{position}: no match found, expected: {}", list_join(.expected))]
    Syntax {
        position: Position,
        expected: Vec<String>,
    },
    #[error("{position}: invalid encoding")]
    Encoding { position: Position },
    #[error("{position}: rule {rule}: {message}")]
    Action {
        position: Position,
        rule: String,
        message: String,
    },
    #[error("invalid entrypoint `{0}`")]
    InvalidEntrypoint(String),
    #[error("max number of expressions parsed ({0})")]
    ExpressionLimit(u64),
    #[error("{position}: rules nested deeper than {limit}")]
    DepthLimit { position: Position, limit: usize },
    #[error(transparent)]
    Grammar(#[from] GrammarError),
}

impl ParseError {
    pub fn position(&self) -> Option<Position> {
        match self {
            ParseError::Syntax { position, .. }
            | ParseError::Encoding { position }
            | ParseError::Action { position, .. }
            | ParseError::DepthLimit { position, .. } => Some(*position),
            _ => None,
        }
    }

    /// Sorted, deduplicated expectations of a syntax error (empty otherwise).
    pub fn expected(&self) -> &[String] {
        match self {
            ParseError::Syntax { expected, .. } => expected,
            _ => &[],
        }
    }
}

/// Rule nesting allowed when [`ParseOptions::max_depth`] is unset.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Per-parse settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Cache rule results by input position (linear time, more memory).
    pub memoize: bool,
    /// Abort after evaluating this many expressions.
    pub max_expressions: Option<u64>,
    /// Maximum number of rules being matched at once; defaults to
    /// [`DEFAULT_MAX_DEPTH`]. Bounds the matcher's stack use.
    pub max_depth: Option<usize>,
    /// Rule to start from instead of the grammar's first rule.
    pub entrypoint: Option<String>,
    /// Emit a TRACE event on every rule entry and exit.
    pub debug: bool,
}

impl ParseOptions {
    pub fn with_memoize(mut self, memoize: bool) -> Self {
        self.memoize = memoize;
        self
    }

    pub fn with_max_expressions(mut self, max: u64) -> Self {
        self.max_expressions = Some(max);
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_entrypoint(mut self, rule: &str) -> Self {
        self.entrypoint = Some(rule.to_string());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Immutable rule table. The first rule is the default entry point.
#[derive(Debug)]
pub struct Grammar<T> {
    rules: Vec<Rule<T>>,
    index: HashMap<String, usize>,
}

fn resolve<T>(
    expr: &mut Expr<T>,
    index: &HashMap<String, usize>,
    owner: &str,
) -> Result<(), GrammarError> {
    match expr {
        Expr::Literal { .. } | Expr::Class(_) | Expr::Any => Ok(()),
        Expr::Sequence(items) | Expr::Choice(items) => items
            .iter_mut()
            .try_for_each(|item| resolve(item, index, owner)),
        Expr::Optional(e)
        | Expr::ZeroOrMore(e)
        | Expr::OneOrMore(e)
        | Expr::And(e)
        | Expr::Not(e)
        | Expr::Label(_, e)
        | Expr::Action(e, _) => resolve(e, index, owner),
        Expr::Rule(r) => {
            r.id = *index
                .get(&r.name)
                .ok_or_else(|| GrammarError::UndefinedRule {
                    rule: owner.to_string(),
                    name: r.name.clone(),
                })?;
            Ok(())
        }
    }
}

impl<T> Grammar<T> {
    /// Build a grammar, rejecting duplicate rule names and dangling references.
    pub fn new(mut rules: Vec<Rule<T>>) -> Result<Self, GrammarError> {
        if rules.is_empty() {
            return Err(GrammarError::Empty);
        }
        let mut index = HashMap::with_capacity(rules.len());
        for (i, r) in rules.iter().enumerate() {
            if index.insert(r.name.clone(), i).is_some() {
                return Err(GrammarError::DuplicateRule(r.name.clone()));
            }
        }
        for r in rules.iter_mut() {
            resolve(&mut r.expr, &index, &r.name)?;
        }
        Ok(Grammar { rules, index })
    }

    pub fn rules(&self) -> &[Rule<T>] {
        &self.rules
    }

    pub fn rule(&self, name: &str) -> Option<&Rule<T>> {
        self.index.get(name).map(|&i| &self.rules[i])
    }
}

impl<T: Clone> Grammar<T> {
    /// Parse raw bytes. Invalid UTF-8 is an [`ParseError::Encoding`] at the
    /// first offending byte.
    pub fn parse(&self, input: &[u8], options: &ParseOptions) -> Result<Value<T>, ParseError> {
        let text = std::str::from_utf8(input).map_err(|err| ParseError::Encoding {
            position: Position::locate(input, err.valid_up_to()),
        })?;
        self.parse_str(text, options)
    }

    pub fn parse_str(&self, input: &str, options: &ParseOptions) -> Result<Value<T>, ParseError> {
        let start = match &options.entrypoint {
            Some(name) => *self
                .index
                .get(name)
                .ok_or_else(|| ParseError::InvalidEntrypoint(name.clone()))?,
            None => 0,
        };
        debug!(
            entrypoint = %self.rules[start].name,
            bytes = input.len(),
            memoize = options.memoize,
            "parse starting"
        );
        let mut matcher = Matcher::new(self, input, options);
        match matcher.match_rule(start).map_err(|err| *err)? {
            Some(value) => {
                debug!(evaluated = matcher.evaluated, "parse finished");
                Ok(value)
            }
            None => Err(matcher.syntax_error()),
        }
    }
}

// Boxed so that every recursive frame carries a small result.
type MatchResult<T> = Result<Option<Value<T>>, Box<ParseError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MemoKey {
    offset: usize,
    rule: usize,
    invert: bool,
    silenced: bool,
}

struct MemoEntry<T> {
    value: Option<Value<T>>,
    end: Position,
}

struct Matcher<'g, 'i, T> {
    grammar: &'g Grammar<T>,
    input: &'i str,
    pos: Position,
    scopes: Vec<Vec<(&'g str, Value<T>)>>,
    rule_stack: Vec<usize>,
    memo: Option<HashMap<MemoKey, MemoEntry<T>>>,
    farthest: Position,
    expected: Vec<String>,
    /// Inside a negative lookahead: successes are what get recorded.
    invert: bool,
    /// Depth of display-named rules being matched.
    silence: usize,
    evaluated: u64,
    max_expressions: u64,
    max_depth: usize,
    debug: bool,
}

impl<'g, 'i, T: Clone> Matcher<'g, 'i, T> {
    fn new(grammar: &'g Grammar<T>, input: &'i str, options: &ParseOptions) -> Self {
        Matcher {
            grammar,
            input,
            pos: Position::START,
            scopes: vec![Vec::new()],
            rule_stack: Vec::new(),
            memo: options.memoize.then(HashMap::new),
            farthest: Position::START,
            expected: Vec::new(),
            invert: false,
            silence: 0,
            evaluated: 0,
            max_expressions: options.max_expressions.unwrap_or(u64::MAX),
            max_depth: options.max_depth.unwrap_or(DEFAULT_MAX_DEPTH),
            debug: options.debug,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos.offset..].chars().next()
    }

    fn slice_from(&self, start: Position) -> &'i str {
        &self.input[start.offset..self.pos.offset]
    }

    fn record(&mut self, matched: bool, at: Position, want: impl FnOnce() -> String) {
        if matched != self.invert || self.silence > 0 || at.offset < self.farthest.offset {
            return;
        }
        if at.offset > self.farthest.offset {
            self.farthest = at;
            self.expected.clear();
        }
        let want = want();
        self.expected
            .push(if self.invert { format!("!{want}") } else { want });
    }

    fn syntax_error(&self) -> ParseError {
        let mut set: BTreeSet<&str> = self.expected.iter().map(String::as_str).collect();
        let eof = set.remove("!.");
        let mut expected: Vec<String> = set.into_iter().map(str::to_string).collect();
        if eof {
            expected.push("EOF".to_string());
        }
        ParseError::Syntax {
            position: self.farthest,
            expected,
        }
    }

    fn current_rule(&self) -> String {
        self.rule_stack
            .last()
            .map(|&i| self.grammar.rules[i].name.clone())
            .unwrap_or_default()
    }

    /// Match `expr` inside a fresh capture scope and return what it bound.
    fn captured(&mut self, expr: &'g Expr<T>) -> (MatchResult<T>, Vec<(&'g str, Value<T>)>) {
        self.scopes.push(Vec::new());
        let result = self.match_expr(expr);
        let bindings = self.scopes.pop().unwrap_or_default();
        (result, bindings)
    }

    /// Match `expr` inside a fresh capture scope that is discarded afterwards.
    fn scoped(&mut self, expr: &'g Expr<T>) -> MatchResult<T> {
        self.captured(expr).0
    }

    #[cold]
    fn trace_enter(&self, rule: &str) {
        trace!(rule, at = %self.pos, depth = self.rule_stack.len(), "enter");
    }

    #[cold]
    fn trace_exit(&self, rule: &str, matched: bool) {
        trace!(rule, matched, end = %self.pos, "exit");
    }

    fn match_rule(&mut self, id: usize) -> MatchResult<T> {
        if self.rule_stack.len() >= self.max_depth {
            return Err(Box::new(ParseError::DepthLimit {
                position: self.pos,
                limit: self.max_depth,
            }));
        }
        let grammar = self.grammar;
        let rule = &grammar.rules[id];
        let key = MemoKey {
            offset: self.pos.offset,
            rule: id,
            invert: self.invert,
            silenced: self.silence > 0,
        };
        if let Some(entry) = self.memo.as_ref().and_then(|memo| memo.get(&key)) {
            self.pos = entry.end;
            return Ok(entry.value.clone());
        }

        let start = self.pos;
        if self.debug {
            self.trace_enter(&rule.name);
        }
        if rule.display_name.is_some() {
            self.silence += 1;
        }
        self.rule_stack.push(id);
        let result = self.scoped(&rule.expr);
        self.rule_stack.pop();
        if let Some(display) = &rule.display_name {
            self.silence -= 1;
            let matched = matches!(result, Ok(Some(_)));
            self.record(matched, start, || display.clone());
        }
        let value = result?;
        if self.debug {
            self.trace_exit(&rule.name, value.is_some());
        }
        if let Some(memo) = self.memo.as_mut() {
            memo.insert(
                key,
                MemoEntry {
                    value: value.clone(),
                    end: self.pos,
                },
            );
        }
        Ok(value)
    }

    fn match_expr(&mut self, expr: &'g Expr<T>) -> MatchResult<T> {
        self.evaluated += 1;
        if self.evaluated > self.max_expressions {
            return Err(Box::new(ParseError::ExpressionLimit(self.max_expressions)));
        }
        let start = self.pos;
        let result = match expr {
            Expr::Literal { text, ignore_case } => Ok(self.match_literal(text, *ignore_case)),
            Expr::Class(class) => Ok(self.match_class(class)),
            Expr::Any => Ok(self.match_any()),
            Expr::Sequence(items) => self.match_sequence(items),
            Expr::Choice(alternatives) => self.match_choice(alternatives),
            Expr::Optional(e) => self.match_optional(e),
            Expr::ZeroOrMore(e) => self.match_repeat(e, 0),
            Expr::OneOrMore(e) => self.match_repeat(e, 1),
            Expr::And(e) => self.match_and(e),
            Expr::Not(e) => self.match_not(e),
            Expr::Label(name, e) => self.match_label(name, e),
            Expr::Rule(r) => self.match_rule(r.id),
            Expr::Action(e, run) => self.match_action(e, *run),
        };
        if let Ok(None) = result {
            self.pos = start;
        }
        result
    }

    fn match_literal(&mut self, text: &'g str, ignore_case: bool) -> Option<Value<T>> {
        let start = self.pos;
        let describe = || format!("{text:?}{}", if ignore_case { "i" } else { "" });
        for want in text.chars() {
            match self.peek() {
                Some(c)
                    if c == want || (ignore_case && c.to_lowercase().eq(want.to_lowercase())) =>
                {
                    self.pos.advance(c)
                }
                _ => {
                    self.record(false, start, describe);
                    return None;
                }
            }
        }
        self.record(true, start, describe);
        Some(Value::Text(self.slice_from(start).to_string()))
    }

    fn match_class(&mut self, class: &'g CharClass) -> Option<Value<T>> {
        let start = self.pos;
        match self.peek() {
            Some(c) if class.matches(c) => {
                self.pos.advance(c);
                self.record(true, start, || class.to_string());
                Some(Value::Text(c.to_string()))
            }
            _ => {
                self.record(false, start, || class.to_string());
                None
            }
        }
    }

    fn match_any(&mut self) -> Option<Value<T>> {
        let start = self.pos;
        match self.peek() {
            Some(c) => {
                self.pos.advance(c);
                self.record(true, start, || ".".to_string());
                Some(Value::Text(c.to_string()))
            }
            None => {
                self.record(false, start, || ".".to_string());
                None
            }
        }
    }

    fn match_sequence(&mut self, items: &'g [Expr<T>]) -> MatchResult<T> {
        let mark = self.scopes.last().map_or(0, Vec::len);
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match self.match_expr(item)? {
                Some(value) => values.push(value),
                None => {
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.truncate(mark);
                    }
                    return Ok(None);
                }
            }
        }
        Ok(Some(Value::List(values)))
    }

    fn match_choice(&mut self, alternatives: &'g [Expr<T>]) -> MatchResult<T> {
        for alternative in alternatives {
            if let Some(value) = self.scoped(alternative)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn match_optional(&mut self, e: &'g Expr<T>) -> MatchResult<T> {
        Ok(Some(self.scoped(e)?.unwrap_or(Value::Nil)))
    }

    fn match_repeat(&mut self, e: &'g Expr<T>, min: usize) -> MatchResult<T> {
        let mut values = Vec::new();
        loop {
            let before = self.pos.offset;
            match self.scoped(e)? {
                Some(value) => {
                    values.push(value);
                    // a nullable child would otherwise loop forever
                    if self.pos.offset == before {
                        break;
                    }
                }
                None => break,
            }
        }
        if values.len() < min {
            return Ok(None);
        }
        Ok(Some(Value::List(values)))
    }

    fn match_and(&mut self, e: &'g Expr<T>) -> MatchResult<T> {
        let start = self.pos;
        let matched = self.scoped(e)?;
        self.pos = start;
        Ok(matched.map(|_| Value::Nil))
    }

    fn match_not(&mut self, e: &'g Expr<T>) -> MatchResult<T> {
        let start = self.pos;
        self.invert = !self.invert;
        let matched = self.scoped(e);
        self.invert = !self.invert;
        self.pos = start;
        Ok(match matched? {
            Some(_) => None,
            None => Some(Value::Nil),
        })
    }

    fn match_label(&mut self, name: &'g str, e: &'g Expr<T>) -> MatchResult<T> {
        let Some(value) = self.scoped(e)? else {
            return Ok(None);
        };
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((name, value));
        }
        Ok(Some(Value::Nil))
    }

    fn match_action(&mut self, e: &'g Expr<T>, run: Action<T>) -> MatchResult<T> {
        let start = self.pos;
        let (result, bindings) = self.captured(e);
        if result?.is_none() {
            return Ok(None);
        }
        let mut captures = Captures {
            bindings,
            text: self.slice_from(start),
        };
        match run(&mut captures) {
            Ok(value) => Ok(Some(value)),
            Err(message) => Err(Box::new(ParseError::Action {
                position: start,
                rule: self.current_rule(),
                message,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(c: &mut Captures<'_, i64>) -> Result<Value<i64>, String> {
        c.text().parse().map(Value::Node).map_err(|e| format!("{e}"))
    }

    fn text(c: &mut Captures<'_, i64>) -> Result<Value<i64>, String> {
        Ok(Value::Text(c.text().to_string()))
    }

    fn digit() -> Expr<i64> {
        class(CharClass::new().range('0', '9'))
    }

    fn grammar(rules: Vec<Rule<i64>>) -> Grammar<i64> {
        Grammar::new(rules).expect("grammar")
    }

    /// sum <- n:number ("+" number)* !.
    fn sum_grammar() -> Grammar<i64> {
        fn sum(c: &mut Captures<'_, i64>) -> Result<Value<i64>, String> {
            let first = c.get("n").and_then(Value::as_node).copied().unwrap_or(0);
            let rest: i64 = c.take("rest").map(|v| v.into_nodes().into_iter().sum()).unwrap_or(0);
            Ok(Value::Node(first + rest))
        }
        grammar(vec![
            Rule::new(
                "sum",
                action(
                    seq([
                        label("n", rule("number")),
                        label("rest", star(seq([lit("+"), rule("number")]))),
                        rule("EOF"),
                    ]),
                    sum,
                ),
            ),
            Rule::new("number", action(plus(digit()), number)).display("number"),
            Rule::new("EOF", not(any())),
        ])
    }

    #[test]
    fn actions_see_labels_and_text() {
        let g = sum_grammar();
        let v = g.parse(b"1+22+300", &ParseOptions::default()).expect("parse");
        assert_eq!(v, Value::Node(323));
    }

    #[test]
    fn failed_choice_leaves_cursor_untouched() {
        // start <- ("ab" "c" / "ab" "d")? rest:.* { rest }
        let g = grammar(vec![Rule::new(
            "start",
            action(
                seq([
                    opt(choice([
                        seq([lit("ab"), lit("c")]),
                        seq([lit("ab"), lit("d")]),
                    ])),
                    label("rest", star(any())),
                ]),
                |c| Ok(Value::Text(c.get("rest").map(Value::flatten_text).unwrap_or_default())),
            ),
        )]);
        let v = g.parse(b"abx", &ParseOptions::default()).expect("parse");
        assert_eq!(v, Value::Text("abx".to_string()));
    }

    #[test]
    fn labels_of_failed_alternative_are_not_visible() {
        let g = grammar(vec![Rule::new(
            "start",
            choice([
                seq([label("x", lit("a")), lit("b")]),
                action(seq([lit("a"), lit("c")]), |c| {
                    Ok(Value::Node(c.get("x").is_some() as i64))
                }),
            ]),
        )]);
        let v = g.parse(b"ac", &ParseOptions::default()).expect("parse");
        assert_eq!(v, Value::Node(0));
    }

    #[test]
    fn lookahead_does_not_consume() {
        // start <- &"a" !"b" t:.* { t }
        let g = grammar(vec![Rule::new(
            "start",
            action(seq([and(lit("a")), not(lit("b")), star(any())]), text),
        )]);
        let v = g.parse(b"abc", &ParseOptions::default()).expect("parse");
        assert_eq!(v, Value::Text("abc".to_string()));
        assert!(g.parse(b"bc", &ParseOptions::default()).is_err());
    }

    #[test]
    fn farthest_failure_reports_sorted_expectations() {
        let g = grammar(vec![Rule::new(
            "start",
            seq([lit("a"), choice([lit("c"), lit("b")])]),
        )]);
        let err = g.parse(b"ax", &ParseOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ParseError::Syntax {
                position: Position { line: 1, column: 2, offset: 1 },
                expected: vec!["\"b\"".to_string(), "\"c\"".to_string()],
            }
        );
        assert_eq!(
            err.to_string(),
            "1:2 [1]: no match found, expected: \"b\" or \"c\""
        );
    }

    #[test]
    fn end_of_input_is_reported_as_eof() {
        let g = sum_grammar();
        let err = g.parse(b"1+2x", &ParseOptions::default()).unwrap_err();
        assert_eq!(err.position().map(|p| p.offset), Some(3));
        assert_eq!(err.expected(), &["\"+\"", "EOF"]);
    }

    #[test]
    fn display_name_replaces_inner_expectations() {
        let g = sum_grammar();
        let err = g.parse(b"1+", &ParseOptions::default()).unwrap_err();
        assert_eq!(err.position().map(|p| p.offset), Some(2));
        assert_eq!(err.expected(), &["number"]);
    }

    #[test]
    fn positions_track_lines_and_columns() {
        let g = grammar(vec![Rule::new("start", seq([lit("a\nb"), lit("c")]))]);
        let err = g.parse(b"a\nbd", &ParseOptions::default()).unwrap_err();
        assert_eq!(
            err.position(),
            Some(Position { line: 2, column: 2, offset: 3 })
        );
    }

    #[test]
    fn memoization_does_not_change_results() {
        let g = sum_grammar();
        for input in ["1", "12+3+45", "1+", "x", "1+2+"] {
            let plain = g.parse(input.as_bytes(), &ParseOptions::default());
            let memo = g.parse(input.as_bytes(), &ParseOptions::default().with_memoize(true));
            assert_eq!(plain, memo, "input {input:?}");
        }
    }

    #[test]
    fn memoization_reuses_rule_results() {
        // start <- number "x" / number "y" / number
        let g = grammar(vec![
            Rule::new(
                "start",
                choice([
                    seq([rule("number"), lit("x")]),
                    seq([rule("number"), lit("y")]),
                    rule("number"),
                ]),
            ),
            Rule::new("number", action(plus(digit()), number)),
        ]);
        let input = "1234567890";
        // without caching, the digits are re-read for every alternative
        let limit = 30;
        assert_eq!(
            g.parse(input.as_bytes(), &ParseOptions::default().with_max_expressions(limit)),
            Err(ParseError::ExpressionLimit(limit))
        );
        let v = g
            .parse(
                input.as_bytes(),
                &ParseOptions::default().with_memoize(true).with_max_expressions(limit),
            )
            .expect("parse");
        assert_eq!(v, Value::Node(1234567890));
    }

    #[test]
    fn invalid_utf8_is_an_encoding_error() {
        let g = sum_grammar();
        let err = g.parse(b"12\n+\xff", &ParseOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ParseError::Encoding {
                position: Position { line: 2, column: 2, offset: 4 }
            }
        );
    }

    #[test]
    fn action_errors_abort_the_parse() {
        let g = grammar(vec![Rule::new(
            "start",
            action(plus(digit()), |_| Err("boom".to_string())),
        )]);
        let err = g.parse(b"12", &ParseOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ParseError::Action {
                position: Position::START,
                rule: "start".to_string(),
                message: "boom".to_string(),
            }
        );
    }

    #[test]
    fn nullable_repetition_terminates() {
        let g = grammar(vec![Rule::new(
            "start",
            action(seq([star(opt(lit("a"))), lit("b")]), text),
        )]);
        let v = g.parse(b"aab", &ParseOptions::default()).expect("parse");
        assert_eq!(v, Value::Text("aab".to_string()));
    }

    #[test]
    fn actions_own_their_labels() {
        fn pair(c: &mut Captures<'_, i64>) -> Result<Value<i64>, String> {
            let a = c.take("a").and_then(Value::into_node).ok_or("no a")?;
            let again = c.take("a").is_some();
            let b = c.get("b").and_then(Value::as_node).copied().ok_or("no b")?;
            Ok(Value::Node(if again { -1 } else { a * 10 + b }))
        }
        let g = grammar(vec![
            Rule::new(
                "pair",
                action(
                    seq([label("a", rule("number")), lit(","), label("b", rule("number"))]),
                    pair,
                ),
            ),
            Rule::new("bare", label("a", rule("number"))),
            Rule::new("number", action(digit(), number)),
        ]);
        assert_eq!(g.parse(b"1,2", &ParseOptions::default()), Ok(Value::Node(12)));
        let bare = ParseOptions::default().with_entrypoint("bare");
        assert_eq!(g.parse(b"7", &bare), Ok(Value::Nil));
    }

    #[test]
    fn rule_nesting_is_bounded() {
        // nest <- "(" nest ")" / "x"
        let g = grammar(vec![Rule::new(
            "nest",
            choice([seq([lit("("), rule("nest"), lit(")")]), lit("x")]),
        )]);
        let ten = format!("{}x{}", "(".repeat(10), ")".repeat(10));
        assert!(g.parse(ten.as_bytes(), &ParseOptions::default().with_max_depth(11)).is_ok());
        assert_eq!(
            g.parse(ten.as_bytes(), &ParseOptions::default().with_max_depth(10)),
            Err(ParseError::DepthLimit {
                position: Position { line: 1, column: 11, offset: 10 },
                limit: 10,
            })
        );
        let deep = format!("{}x{}", "(".repeat(100_000), ")".repeat(100_000));
        let err = g.parse(deep.as_bytes(), &ParseOptions::default()).unwrap_err();
        assert!(
            matches!(err, ParseError::DepthLimit { limit, .. } if limit == DEFAULT_MAX_DEPTH),
            "{err:?}"
        );
    }

    #[test]
    fn entrypoint_selects_rule() {
        let g = sum_grammar();
        let options = ParseOptions::default().with_entrypoint("number");
        assert_eq!(g.parse(b"42", &options), Ok(Value::Node(42)));
        assert_eq!(
            g.parse(b"42", &ParseOptions::default().with_entrypoint("nope")),
            Err(ParseError::InvalidEntrypoint("nope".to_string()))
        );
    }

    #[test]
    fn case_insensitive_literal_and_class() {
        let g = grammar(vec![Rule::new(
            "start",
            action(
                seq([lit_i("Hex"), plus(class(CharClass::new().range('a', 'f').ignore_case()))]),
                text,
            ),
        )]);
        let v = g.parse(b"hEXaBf", &ParseOptions::default()).expect("parse");
        assert_eq!(v, Value::Text("hEXaBf".to_string()));
    }

    #[test]
    fn grammar_construction_is_checked() {
        assert_eq!(Grammar::<i64>::new(vec![]).unwrap_err(), GrammarError::Empty);
        let dup = Grammar::new(vec![Rule::new("a", lit::<i64>("x")), Rule::new("a", lit("y"))]);
        assert_eq!(dup.unwrap_err(), GrammarError::DuplicateRule("a".to_string()));
        let dangling = Grammar::new(vec![Rule::new("a", rule::<i64>("b"))]);
        assert_eq!(
            dangling.unwrap_err(),
            GrammarError::UndefinedRule { rule: "a".to_string(), name: "b".to_string() }
        );
    }

    #[test]
    fn char_class_display_and_inversion() {
        let c = CharClass::new().chars("_\n").range('a', 'z').inverted();
        assert_eq!(c.to_string(), "[^_\\na-z]");
        assert!(c.matches('A'));
        assert!(!c.matches('q'));
        assert!(!c.matches('\n'));
    }

    #[test]
    fn grammar_is_shareable_across_threads() {
        fn assert_send_sync<X: Send + Sync>() {}
        assert_send_sync::<Grammar<i64>>();
        let g = sum_grammar();
        std::thread::scope(|s| {
            let handles: Vec<_> = (1..=4)
                .map(|n| {
                    let g = &g;
                    s.spawn(move || {
                        g.parse(format!("{n}+{n}").as_bytes(), &ParseOptions::default())
                    })
                })
                .collect();
            for (n, h) in (1..=4).zip(handles) {
                assert_eq!(h.join().expect("thread"), Ok(Value::Node(2 * n)));
            }
        });
    }
}
