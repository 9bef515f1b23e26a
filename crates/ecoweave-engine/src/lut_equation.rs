//! Boolean equations of lookup tables and their INIT strings.
//!
//! Equations use the `O=` form: variables `I0`..`I5`, constants `0`/`1`,
//! prefix negation `~`/`!`, conjunction `&`/`*`/`.`, exclusive or `^`/`@`
//! (same precedence as conjunction, left associative) and disjunction
//! `+`/`|`, the loosest operator. INIT strings are `<bits>'h<HEX>`.

use std::fmt;

use ecoweave_netlist::{InstId, Netlist};

use crate::error::{EcoError, Result};

pub const LUT_INIT: &str = "INIT";
pub const MAX_LUT_SIZE: u8 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Const(bool),
    Var(u8),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Xor(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn parse(equation: &str) -> Result<Expr> {
        let body = equation.trim();
        let body = body
            .strip_prefix('O')
            .and_then(|rest| rest.trim_start().strip_prefix('='))
            .unwrap_or(body);
        let mut parser = Parser {
            equation,
            chars: body.chars().filter(|c| !c.is_whitespace()).collect(),
            pos: 0,
        };
        let expr = parser.or()?;
        if let Some(c) = parser.peek() {
            return Err(parser.error(format!("unexpected '{c}'")));
        }
        Ok(expr)
    }

    /// Sum of minterms of a truth table over `size` inputs.
    pub fn from_table(table: u64, size: u8) -> Expr {
        let rows = 1u32 << size;
        let ones: Vec<u32> = (0..rows).filter(|r| table >> r & 1 == 1).collect();
        if ones.is_empty() {
            return Expr::Const(false);
        }
        if ones.len() == rows as usize {
            return Expr::Const(true);
        }
        ones.into_iter()
            .map(|row| {
                (0..size)
                    .rev()
                    .map(|i| {
                        if row >> i & 1 == 1 {
                            Expr::Var(i)
                        } else {
                            Expr::Not(Box::new(Expr::Var(i)))
                        }
                    })
                    .reduce(|a, b| Expr::And(Box::new(a), Box::new(b)))
                    .unwrap_or(Expr::Const(true))
            })
            .reduce(|a, b| Expr::Or(Box::new(a), Box::new(b)))
            .unwrap_or(Expr::Const(false))
    }

    /// Value for an input assignment; bit `i` of `row` drives `Ii`.
    pub fn eval(&self, row: u32) -> bool {
        match self {
            Expr::Const(v) => *v,
            Expr::Var(i) => row >> i & 1 == 1,
            Expr::Not(e) => !e.eval(row),
            Expr::And(a, b) => a.eval(row) && b.eval(row),
            Expr::Xor(a, b) => a.eval(row) ^ b.eval(row),
            Expr::Or(a, b) => a.eval(row) || b.eval(row),
        }
    }

    /// Replaces every variable by the expression `f` returns for it.
    pub fn substitute(&self, f: &mut impl FnMut(u8) -> Result<Expr>) -> Result<Expr> {
        Ok(match self {
            Expr::Const(v) => Expr::Const(*v),
            Expr::Var(i) => f(*i)?,
            Expr::Not(e) => Expr::Not(Box::new(e.substitute(f)?)),
            Expr::And(a, b) => Expr::And(Box::new(a.substitute(f)?), Box::new(b.substitute(f)?)),
            Expr::Xor(a, b) => Expr::Xor(Box::new(a.substitute(f)?), Box::new(b.substitute(f)?)),
            Expr::Or(a, b) => Expr::Or(Box::new(a.substitute(f)?), Box::new(b.substitute(f)?)),
        })
    }

    pub fn truth_table(&self, size: u8) -> u64 {
        (0..1u32 << size)
            .filter(|row| self.eval(*row))
            .fold(0u64, |acc, row| acc | 1 << row)
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Or(..) => 0,
            Expr::And(..) | Expr::Xor(..) => 1,
            _ => 2,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "(")?;
            self.fmt_expr(f)?;
            write!(f, ")")
        } else {
            self.fmt_expr(f)
        }
    }

    fn fmt_expr(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) => write!(f, "{}", u8::from(*v)),
            Expr::Var(i) => write!(f, "I{i}"),
            Expr::Not(e) => {
                write!(f, "!")?;
                e.fmt_operand(f, 2)
            }
            Expr::And(a, b) | Expr::Xor(a, b) => {
                let op = if matches!(self, Expr::And(..)) { "&" } else { "^" };
                a.fmt_operand(f, 1)?;
                write!(f, " {op} ")?;
                b.fmt_operand(f, 2)
            }
            Expr::Or(a, b) => {
                a.fmt_operand(f, 0)?;
                write!(f, " + ")?;
                b.fmt_operand(f, 1)
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O=")?;
        self.fmt_expr(f)
    }
}

struct Parser<'a> {
    equation: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, options: &[char]) -> bool {
        match self.peek() {
            Some(c) if options.contains(&c) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn error(&self, reason: String) -> EcoError {
        EcoError::Equation {
            equation: self.equation.to_string(),
            reason,
        }
    }

    fn or(&mut self) -> Result<Expr> {
        let mut lhs = self.and_xor()?;
        while self.eat(&['+', '|']) {
            lhs = Expr::Or(Box::new(lhs), Box::new(self.and_xor()?));
        }
        Ok(lhs)
    }

    fn and_xor(&mut self) -> Result<Expr> {
        let mut lhs = self.literal()?;
        loop {
            if self.eat(&['&', '*', '.']) {
                lhs = Expr::And(Box::new(lhs), Box::new(self.literal()?));
            } else if self.eat(&['^', '@']) {
                lhs = Expr::Xor(Box::new(lhs), Box::new(self.literal()?));
            } else {
                return Ok(lhs);
            }
        }
    }

    fn literal(&mut self) -> Result<Expr> {
        if self.eat(&['~', '!']) {
            return Ok(Expr::Not(Box::new(self.literal()?)));
        }
        if self.eat(&['(']) {
            let inner = self.or()?;
            if !self.eat(&[')']) {
                return Err(self.error("missing ')'".to_string()));
            }
            return Ok(inner);
        }
        match self.peek() {
            Some('0') => {
                self.pos += 1;
                Ok(Expr::Const(false))
            }
            Some('1') => {
                self.pos += 1;
                Ok(Expr::Const(true))
            }
            Some('I') => {
                self.pos += 1;
                match self.peek().and_then(|c| c.to_digit(10)) {
                    Some(d) if d < MAX_LUT_SIZE as u32 => {
                        self.pos += 1;
                        Ok(Expr::Var(d as u8))
                    }
                    _ => Err(self.error("expected input index 0-5 after 'I'".to_string())),
                }
            }
            Some(c) => Err(self.error(format!("unexpected '{c}'"))),
            None => Err(self.error("unexpected end of equation".to_string())),
        }
    }
}

/// INIT string for a truth table over `size` inputs.
pub fn init_string(table: u64, size: u8) -> String {
    let bits = 1u32 << size;
    let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
    format!("{bits}'h{:X}", table & mask)
}

/// Parses an INIT string into `(size, table)`.
pub fn parse_init(init: &str) -> Result<(u8, u64)> {
    let bad = |reason: &str| EcoError::Equation {
        equation: init.to_string(),
        reason: reason.to_string(),
    };
    let (len, value) = init.split_once('\'').ok_or_else(|| bad("missing '"))?;
    let bits: u32 = len.trim().parse().map_err(|_| bad("bad INIT length"))?;
    let size = match bits {
        2 => 1,
        4 => 2,
        8 => 3,
        16 => 4,
        32 => 5,
        64 => 6,
        _ => return Err(bad("unsupported INIT length")),
    };
    let mut chars = value.chars();
    let radix = match chars.next().map(|c| c.to_ascii_lowercase()) {
        Some('h') => 16,
        Some('d') => 10,
        Some('o') => 8,
        Some('b') => 2,
        _ => return Err(bad("unsupported radix")),
    };
    let table = u64::from_str_radix(chars.as_str(), radix).map_err(|_| bad("bad INIT value"))?;
    Ok((size, table))
}

pub fn init_from_equation(equation: &str, size: u8) -> Result<String> {
    Ok(init_string(Expr::parse(equation)?.truth_table(size), size))
}

pub fn equation_from_init(init: &str) -> Result<String> {
    let (size, table) = parse_init(init)?;
    Ok(Expr::from_table(table, size).to_string())
}

/// Equation of a LUT instance, read from its INIT property.
pub fn lut_expr(netlist: &Netlist, inst: InstId) -> Result<Expr> {
    let (size, table) = lut_table(netlist, inst)?;
    Ok(Expr::from_table(table, size))
}

/// Input count and truth table of a LUT instance, read from its INIT.
pub fn lut_table(netlist: &Netlist, inst: InstId) -> Result<(u8, u64)> {
    let init = netlist.property(inst, LUT_INIT).ok_or_else(|| EcoError::Equation {
        equation: String::new(),
        reason: format!("{} has no {LUT_INIT} property", netlist.inst_path(inst)),
    })?;
    parse_init(init)
}

/// Sets the INIT property of a LUT instance from an expression.
pub fn configure_lut(netlist: &mut Netlist, inst: InstId, expr: &Expr) -> Result<String> {
    let size = netlist
        .primitive(inst)
        .and_then(|p| p.lut_size())
        .ok_or_else(|| EcoError::UnsupportedDriver {
            cell: netlist.inst_path(inst),
            cell_type: netlist.inst(inst).cell_type.clone(),
        })?;
    let init = init_string(expr.truth_table(size), size);
    netlist.set_property(inst, LUT_INIT, init.clone());
    Ok(init)
}
