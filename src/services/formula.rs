//! Formula language for tariff modifiers
//!
//! A small expression grammar over numeric variables:
//!
//! - literals and variables (`tarifa`, `peso`, ...), compared case-insensitively
//! - `+ - * /`, comparisons `> < >= <= == !=`, logic `&& ||`, unary `-` and `!`
//! - functions `SI`/`IF`, `MAX`, `MIN`, `REDONDEAR`/`ROUND`, `ABS`, `PROMEDIO`/`AVERAGE`
//!
//! Comparisons and logic produce `1` or `0`. Formulas are validated when they
//! are edited (`validate_formula`); evaluation only runs on parsed formulas.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::FormulaError;

/// Variables available to tariff formulas
pub const TARIFF_VARIABLES: &[&str] = &[
    "tarifa", "peaje", "extras", "total", "peso", "volumen", "distancia", "bultos",
];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
struct PositionedToken {
    token: Token,
    position: usize,
}

/// Parsing and evaluation recurse over the expression tree, so its size is bounded
pub const MAX_FORMULA_LENGTH: usize = 1000;
pub const MAX_FORMULA_TOKENS: usize = 256;
pub const MAX_NESTING_DEPTH: usize = 32;

/// Two-character operators are matched before their one-character prefixes
const OPERATORS: &[&str] = &["&&", "||", ">=", "<=", "==", "!=", "+", "-", "*", "/", ">", "<", "!"];

fn tokenize(input: &str) -> Result<Vec<PositionedToken>, FormulaError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let ch = chars[pos];
        if ch.is_whitespace() {
            pos += 1;
            continue;
        }
        let start = pos;

        let token = if ch.is_ascii_digit() || (ch == '.' && chars.get(pos + 1).is_some_and(|c| c.is_ascii_digit())) {
            while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                pos += 1;
            }
            let text: String = chars[start..pos].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| FormulaError::UnexpectedChar { ch, position: start })?;
            Token::Number(value)
        } else if ch.is_alphabetic() || ch == '_' {
            while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            Token::Ident(chars[start..pos].iter().collect())
        } else {
            pos += 1;
            match ch {
                '(' => Token::LParen,
                ')' => Token::RParen,
                ',' | ';' => Token::Comma,
                _ => {
                    let two: String = chars[start..(start + 2).min(chars.len())].iter().collect();
                    let op = OPERATORS
                        .iter()
                        .find(|op| two.starts_with(**op))
                        .ok_or(FormulaError::UnexpectedChar { ch, position: start })?;
                    pos = start + op.len();
                    Token::Op(*op)
                }
            }
        };

        tokens.push(PositionedToken { token, position: start });
    }

    Ok(tokens)
}

/// Parentheses must pair up and nest at most `MAX_NESTING_DEPTH` levels
fn check_balance(tokens: &[PositionedToken]) -> Result<(), FormulaError> {
    let mut depth: usize = 0;
    let mut deepest: usize = 0;
    for t in tokens {
        match t.token {
            Token::LParen => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            Token::RParen => {
                depth = depth.checked_sub(1).ok_or(FormulaError::UnbalancedParentheses)?;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(FormulaError::UnbalancedParentheses);
    }
    if deepest > MAX_NESTING_DEPTH {
        return Err(FormulaError::TooDeep { max: MAX_NESTING_DEPTH });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Function {
    If,
    Max,
    Min,
    Round,
    Abs,
    Average,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "SI" | "IF" => Some(Function::If),
            "MAX" => Some(Function::Max),
            "MIN" => Some(Function::Min),
            "REDONDEAR" | "ROUND" => Some(Function::Round),
            "ABS" => Some(Function::Abs),
            "PROMEDIO" | "AVERAGE" => Some(Function::Average),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::If => "SI",
            Function::Max => "MAX",
            Function::Min => "MIN",
            Function::Round => "REDONDEAR",
            Function::Abs => "ABS",
            Function::Average => "PROMEDIO",
        }
    }

    fn check_arity(&self, got: usize) -> Result<(), FormulaError> {
        let (ok, expected) = match self {
            Function::If => (got == 3, "3"),
            Function::Abs => (got == 1, "1"),
            Function::Round => ((1..=2).contains(&got), "1 o 2"),
            Function::Max | Function::Min | Function::Average => (got >= 1, "al menos 1"),
        };
        if ok {
            Ok(())
        } else {
            Err(FormulaError::Arity {
                name: self.name().to_string(),
                expected: expected.to_string(),
                got,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Variable(String),
    Negate(Box<Expr>),
    Not(Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

/// Binary operator levels, loosest first
const PRECEDENCE: &[&[&str]] = &[&["||"], &["&&"], &["==", "!="], &[">", "<", ">=", "<="], &["+", "-"], &["*", "/"]];

struct Parser {
    tokens: Vec<PositionedToken>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |t| t.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        self.pos += 1;
        token
    }

    fn expected(&self, what: &str) -> FormulaError {
        FormulaError::UnexpectedToken {
            expected: what.to_string(),
            position: self.position(),
        }
    }

    fn parse_level(&mut self, level: usize) -> Result<Expr, FormulaError> {
        if level == PRECEDENCE.len() {
            return self.parse_unary();
        }
        let mut lhs = self.parse_level(level + 1)?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !PRECEDENCE[level].contains(&op) {
                break;
            }
            self.advance();
            let rhs = self.parse_level(level + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek() {
            Some(Token::Op("-")) => {
                self.advance();
                Ok(Expr::Negate(Box::new(self.parse_unary()?)))
            }
            Some(Token::Op("+")) => {
                self.advance();
                self.parse_unary()
            }
            Some(Token::Op("!")) => {
                self.advance();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, FormulaError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => {
                if self.peek() != Some(&Token::LParen) {
                    return Ok(Expr::Variable(name.to_lowercase()));
                }
                let function = Function::from_name(&name).ok_or(FormulaError::UnknownFunction(name))?;
                self.advance();
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        args.push(self.parse_level(0)?);
                        match self.peek() {
                            Some(Token::Comma) => {
                                self.advance();
                            }
                            _ => break,
                        }
                    }
                }
                if self.advance() != Some(Token::RParen) {
                    self.pos -= 1;
                    return Err(self.expected("')'"));
                }
                function.check_arity(args.len())?;
                Ok(Expr::Call(function, args))
            }
            Some(Token::LParen) => {
                let inner = self.parse_level(0)?;
                if self.advance() != Some(Token::RParen) {
                    self.pos -= 1;
                    return Err(self.expected("')'"));
                }
                Ok(inner)
            }
            _ => {
                self.pos -= 1;
                Err(self.expected("un número, una variable o '('"))
            }
        }
    }
}

/// A parsed formula
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        if source.chars().count() > MAX_FORMULA_LENGTH {
            return Err(FormulaError::TooLong { max: MAX_FORMULA_LENGTH });
        }
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(FormulaError::Empty);
        }
        check_balance(&tokens)?;
        if tokens.len() > MAX_FORMULA_TOKENS {
            return Err(FormulaError::TooManyTokens { max: MAX_FORMULA_TOKENS });
        }

        let mut parser = Parser {
            tokens,
            pos: 0,
            end: source.chars().count(),
        };
        let expr = parser.parse_level(0)?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.expected("el final de la fórmula"));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Lowercased variable names referenced by the formula
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect(&self.expr, &mut |e| {
            if let Expr::Variable(name) = e {
                out.insert(name.clone());
            }
        });
        out
    }

    pub fn functions(&self) -> BTreeSet<Function> {
        let mut out = BTreeSet::new();
        collect(&self.expr, &mut |e| {
            if let Expr::Call(f, _) = e {
                out.insert(*f);
            }
        });
        out
    }

    /// Evaluate against `variables` (keys compared lowercase)
    pub fn evaluate(&self, variables: &HashMap<String, f64>) -> Result<f64, FormulaError> {
        let lowered: HashMap<String, f64> = variables.iter().map(|(k, v)| (k.to_lowercase(), *v)).collect();
        eval(&self.expr, &lowered)
    }
}

fn collect<'a>(expr: &'a Expr, visit: &mut impl FnMut(&'a Expr)) {
    visit(expr);
    match expr {
        Expr::Negate(inner) | Expr::Not(inner) => collect(inner, visit),
        Expr::Binary(_, lhs, rhs) => {
            collect(lhs, visit);
            collect(rhs, visit);
        }
        Expr::Call(_, args) => args.iter().for_each(|a| collect(a, visit)),
        Expr::Number(_) | Expr::Variable(_) => {}
    }
}

fn truthy(v: f64) -> bool {
    v != 0.0
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn eval(expr: &Expr, vars: &HashMap<String, f64>) -> Result<f64, FormulaError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Variable(name) => vars
            .get(name)
            .copied()
            .ok_or_else(|| FormulaError::UndefinedVariable(name.clone())),
        Expr::Negate(inner) => Ok(-eval(inner, vars)?),
        Expr::Not(inner) => Ok(flag(!truthy(eval(inner, vars)?))),
        Expr::Binary("&&", lhs, rhs) => Ok(flag(truthy(eval(lhs, vars)?) && truthy(eval(rhs, vars)?))),
        Expr::Binary("||", lhs, rhs) => Ok(flag(truthy(eval(lhs, vars)?) || truthy(eval(rhs, vars)?))),
        Expr::Binary(op, lhs, rhs) => {
            let a = eval(lhs, vars)?;
            let b = eval(rhs, vars)?;
            match *op {
                "+" => Ok(a + b),
                "-" => Ok(a - b),
                "*" => Ok(a * b),
                "/" if b == 0.0 => Err(FormulaError::DivisionByZero),
                "/" => Ok(a / b),
                ">" => Ok(flag(a > b)),
                "<" => Ok(flag(a < b)),
                ">=" => Ok(flag(a >= b)),
                "<=" => Ok(flag(a <= b)),
                "==" => Ok(flag((a - b).abs() < f64::EPSILON)),
                "!=" => Ok(flag((a - b).abs() >= f64::EPSILON)),
                other => Err(FormulaError::UnexpectedToken {
                    expected: format!("un operador conocido en lugar de '{}'", other),
                    position: 0,
                }),
            }
        }
        Expr::Call(function, args) => call(*function, args, vars),
    }
}

fn call(function: Function, args: &[Expr], vars: &HashMap<String, f64>) -> Result<f64, FormulaError> {
    if function == Function::If {
        let branch = if truthy(eval(&args[0], vars)?) { &args[1] } else { &args[2] };
        return eval(branch, vars);
    }

    let values = args.iter().map(|a| eval(a, vars)).collect::<Result<Vec<_>, _>>()?;
    Ok(match function {
        Function::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Function::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        Function::Abs => values[0].abs(),
        Function::Average => values.iter().sum::<f64>() / values.len() as f64,
        Function::Round | Function::If => {
            let decimals = values.get(1).copied().unwrap_or(0.0).trunc() as i32;
            let factor = 10f64.powi(decimals);
            (values[0] * factor).round() / factor
        }
    })
}

/// Result of validating a formula at edit time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaValidation {
    pub valida: bool,
    pub errores: Vec<String>,
    pub variables_usadas: Vec<String>,
    pub funciones_usadas: Vec<String>,
}

/// Validate `source` against the set of registered variable names.
/// Never fails: problems are listed in `errores`.
pub fn validate_formula<'a>(source: &str, known: impl IntoIterator<Item = &'a str>) -> FormulaValidation {
    let formula = match Formula::parse(source) {
        Ok(f) => f,
        Err(e) => {
            return FormulaValidation {
                valida: false,
                errores: vec![e.to_string()],
                variables_usadas: Vec::new(),
                funciones_usadas: Vec::new(),
            }
        }
    };

    let known: BTreeSet<String> = known.into_iter().map(str::to_lowercase).collect();
    let variables = formula.variables();
    let errores: Vec<String> = variables
        .iter()
        .filter(|v| !known.contains(*v))
        .map(|v| FormulaError::UndefinedVariable(v.clone()).to_string())
        .collect();

    FormulaValidation {
        valida: errores.is_empty(),
        errores,
        variables_usadas: variables.into_iter().collect(),
        funciones_usadas: formula.functions().iter().map(|f| f.name().to_string()).collect(),
    }
}
