//! Compiler for the `TFormula`-style expressions stored in formula nodes.
//!
//! Supported syntax:
//! - numbers (including scientific notation) and the constant `pi`
//! - bound parameters `[0]`, `[1]`, ... (checked against the parameter list)
//! - variables `x`, `y`, `z`, `t`, bound positionally to the node's `variables`
//! - arithmetic `+ - * /`, unary minus, parentheses
//! - functions `sqrt pow cos sin tan acos asin atan atan2 exp log abs fabs min
//!   max hypot`
//!
//! Parameters are folded into the AST at compile time, so evaluation only
//! needs the variable values.

use crate::schema::eval::EvalError;

// ── AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Var(usize),
    Neg(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy)]
enum Func {
    Sqrt,
    Pow,
    Cos,
    Sin,
    Tan,
    Acos,
    Asin,
    Atan,
    Atan2,
    Exp,
    Log,
    Abs,
    Min,
    Max,
    Hypot,
}

impl Func {
    fn lookup(name: &str) -> Option<Func> {
        let f = match name {
            "sqrt" => Func::Sqrt,
            "pow" => Func::Pow,
            "cos" => Func::Cos,
            "sin" => Func::Sin,
            "tan" => Func::Tan,
            "acos" => Func::Acos,
            "asin" => Func::Asin,
            "atan" => Func::Atan,
            "atan2" => Func::Atan2,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "abs" | "fabs" => Func::Abs,
            "min" => Func::Min,
            "max" => Func::Max,
            "hypot" => Func::Hypot,
            _ => return None,
        };
        Some(f)
    }

    fn arity(self) -> usize {
        match self {
            Func::Pow | Func::Atan2 | Func::Min | Func::Max | Func::Hypot => 2,
            _ => 1,
        }
    }
}

// ── Compiled formula ───────────────────────────────────────────

/// A compiled formula ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledFormula {
    ast: Expr,
    n_vars: usize,
}

impl CompiledFormula {
    /// Parse `input`, binding `[i]` to `parameters[i]`.
    ///
    /// `n_vars` is the number of variables the node declares; referencing `z`
    /// in a two-variable formula is a compile error.
    pub fn compile(input: &str, n_vars: usize, parameters: &[f64]) -> Result<Self, EvalError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            n_vars,
            parameters,
        };
        let ast = parser.parse_add()?;
        if parser.pos < tokens.len() {
            return Err(EvalError::Formula(format!(
                "unexpected token after expression: {:?}",
                tokens[parser.pos]
            )));
        }
        Ok(CompiledFormula { ast, n_vars })
    }

    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    /// Evaluate with variable values in declaration order.
    pub fn eval(&self, vars: &[f64]) -> f64 {
        eval_expr(&self.ast, vars)
    }
}

// ── Evaluation ─────────────────────────────────────────────────

fn eval_expr(e: &Expr, vars: &[f64]) -> f64 {
    match e {
        Expr::Number(n) => *n,
        Expr::Var(i) => vars[*i],
        Expr::Neg(a) => -eval_expr(a, vars),
        Expr::BinOp(op, a, b) => {
            let lhs = eval_expr(a, vars);
            let rhs = eval_expr(b, vars);
            match op {
                BinOp::Add => lhs + rhs,
                BinOp::Sub => lhs - rhs,
                BinOp::Mul => lhs * rhs,
                BinOp::Div => lhs / rhs,
            }
        }
        Expr::Call(f, args) => {
            let a0 = || eval_expr(&args[0], vars);
            let a1 = || eval_expr(&args[1], vars);
            match f {
                Func::Sqrt => a0().sqrt(),
                Func::Pow => a0().powf(a1()),
                Func::Cos => a0().cos(),
                Func::Sin => a0().sin(),
                Func::Tan => a0().tan(),
                Func::Acos => a0().acos(),
                Func::Asin => a0().asin(),
                Func::Atan => a0().atan(),
                Func::Atan2 => a0().atan2(a1()),
                Func::Exp => a0().exp(),
                Func::Log => a0().ln(),
                Func::Abs => a0().abs(),
                Func::Min => a0().min(a1()),
                Func::Max => a0().max(a1()),
                Func::Hypot => a0().hypot(a1()),
            }
        }
    }
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Param(usize),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        match c {
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '[' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end].is_ascii_digit() {
                    end += 1;
                }
                if end == start || end >= chars.len() || chars[end] != ']' {
                    return Err(EvalError::Formula(format!(
                        "malformed parameter reference at offset {i}"
                    )));
                }
                let digits: String = chars[start..end].iter().collect();
                let idx: usize = digits.parse().map_err(|_| {
                    EvalError::Formula(format!("invalid parameter index: '{digits}'"))
                })?;
                tokens.push(Token::Param(idx));
                i = end + 1;
            }
            _ if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || chars[i] == 'e'
                        || chars[i] == 'E'
                        || ((chars[i] == '+' || chars[i] == '-')
                            && i > start
                            && (chars[i - 1] == 'e' || chars[i - 1] == 'E')))
                {
                    i += 1;
                }
                let s: String = chars[start..i].iter().collect();
                let n: f64 = s
                    .parse()
                    .map_err(|_| EvalError::Formula(format!("invalid number: '{s}'")))?;
                tokens.push(Token::Num(n));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                return Err(EvalError::Formula(format!("unexpected character: '{c}'")));
            }
        }
    }

    Ok(tokens)
}

// ── Parser (recursive descent) ─────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    n_vars: usize,
    parameters: &'a [f64],
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<(), EvalError> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            other => Err(EvalError::Formula(format!(
                "expected {expected:?}, got {other:?}"
            ))),
        }
    }

    fn variable(&self, name: &str) -> Result<Expr, EvalError> {
        let idx = match name {
            "x" => 0,
            "y" => 1,
            "z" => 2,
            "t" => 3,
            "pi" => return Ok(Expr::Number(std::f64::consts::PI)),
            _ => {
                return Err(EvalError::Formula(format!("unknown identifier: '{name}'")));
            }
        };
        if idx >= self.n_vars {
            return Err(EvalError::Formula(format!(
                "variable '{name}' used but only {} variable(s) declared",
                self.n_vars
            )));
        }
        Ok(Expr::Var(idx))
    }

    // ── Grammar rules ──────────────────────────────────────────

    fn parse_add(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::Neg(Box::new(e)))
            }
            Some(Token::Plus) => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, EvalError> {
        match self.advance().cloned() {
            Some(Token::Num(n)) => Ok(Expr::Number(n)),
            Some(Token::Param(idx)) => match self.parameters.get(idx) {
                Some(v) => Ok(Expr::Number(*v)),
                None => Err(EvalError::Formula(format!(
                    "parameter [{idx}] referenced but only {} bound",
                    self.parameters.len()
                ))),
            },
            Some(Token::LParen) => {
                let e = self.parse_add()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) => {
                if !matches!(self.peek(), Some(Token::LParen)) {
                    return self.variable(&name);
                }
                self.advance();
                let func = Func::lookup(&name)
                    .ok_or_else(|| EvalError::Formula(format!("unknown function: '{name}'")))?;
                let mut args = vec![self.parse_add()?];
                while matches!(self.peek(), Some(Token::Comma)) {
                    self.advance();
                    args.push(self.parse_add()?);
                }
                self.expect(&Token::RParen)?;
                if args.len() != func.arity() {
                    return Err(EvalError::Formula(format!(
                        "function '{name}' takes {} argument(s), got {}",
                        func.arity(),
                        args.len()
                    )));
                }
                Ok(Expr::Call(func, args))
            }
            other => Err(EvalError::Formula(format!(
                "expected number, parameter, identifier, or '(', got {other:?}"
            ))),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_and_precedence() {
        let f = CompiledFormula::compile("2 + 3 * 4 - -1", 0, &[]).unwrap();
        assert!((f.eval(&[]) - 15.0).abs() < 1e-12);

        let f = CompiledFormula::compile("(1 + 2) * (3 + 4) / 7", 0, &[]).unwrap();
        assert!((f.eval(&[]) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn parameters_are_bound_at_compile_time() {
        let f = CompiledFormula::compile("[0]*x + [1]", 1, &[2.0, -3.0]).unwrap();
        assert!((f.eval(&[5.0]) - 7.0).abs() < 1e-12);

        let err = CompiledFormula::compile("[2]*x", 1, &[1.0]).unwrap_err();
        assert!(matches!(err, EvalError::Formula(_)));
    }

    #[test]
    fn positional_variables() {
        let f = CompiledFormula::compile("x * cos(y) - z", 3, &[]).unwrap();
        assert!((f.eval(&[50.0, 0.0, 40.0]) - 10.0).abs() < 1e-12);
        assert!(CompiledFormula::compile("x + z", 2, &[]).is_err());
    }

    #[test]
    fn functions() {
        let f = CompiledFormula::compile("sqrt(pow(x, 2) + pow(y, 2))", 2, &[]).unwrap();
        assert!((f.eval(&[3.0, 4.0]) - 5.0).abs() < 1e-12);

        let f = CompiledFormula::compile("atan2(y, x)", 2, &[]).unwrap();
        assert!((f.eval(&[-1.0, 0.0]) - std::f64::consts::PI).abs() < 1e-12);

        let f = CompiledFormula::compile("fabs(x) + max(x, 1) + hypot(3, 4)", 1, &[]).unwrap();
        assert!((f.eval(&[-2.0]) - 8.0).abs() < 1e-12);

        assert!(CompiledFormula::compile("pow(x)", 1, &[]).is_err());
        assert!(CompiledFormula::compile("erf(x)", 1, &[]).is_err());
    }

    #[test]
    fn scientific_notation_and_pi() {
        let f = CompiledFormula::compile("1.5e2 + 3.0E-1 + pi", 0, &[]).unwrap();
        assert!((f.eval(&[]) - (150.3 + std::f64::consts::PI)).abs() < 1e-10);
    }

    #[test]
    fn rejects_garbage() {
        assert!(CompiledFormula::compile("x +", 1, &[]).is_err());
        assert!(CompiledFormula::compile("x $ 2", 1, &[]).is_err());
        assert!(CompiledFormula::compile("[a]", 0, &[]).is_err());
        assert!(CompiledFormula::compile("(x", 1, &[]).is_err());
    }
}
