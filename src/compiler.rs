//! Expression Compiler (spec §4.B).
//!
//! Turns an infix arithmetic string into a set of [`Task`] records linked
//! by `depends_on` edges: tokenize, shunting-yard to RPN, then walk the RPN
//! with an operand stack to materialize tasks.
//!
//! Grounded on the original `InfixToRPN`/`CreateTasksFromExpression` pair
//! (`internal/handlers/expressions.go`): same digit/`.` scanning, same
//! precedence table, same left-to-right operand ordering (`arg1` = the
//! operand pushed first, `arg2` = the one popped first).

use std::collections::HashSet;

use uuid::Uuid;

use crate::config::OperationTimings;
use crate::model::{Operator, Task, TaskStatus};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("{0}")]
    InvalidSyntax(String),

    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(String),
    Op(Operator),
    LParen,
    RParen,
}

/// Tokenize an infix expression.
///
/// Unary minus is accepted at start-of-expression, after `(`, and after
/// another operator, by emitting an implicit `0` operand ahead of it — the
/// documented convention from spec §4.B step 1 (confirmed against the
/// original's `RPN` function in `main.go`, which inserts a literal `"0"`
/// token in exactly these three contexts).
fn tokenize(expr: &str) -> Result<Vec<Token>, CompileError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let prev_allows_unary = |tokens: &[Token]| -> bool {
        match tokens.last() {
            None => true,
            Some(Token::LParen) => true,
            Some(Token::Op(_)) => true,
            Some(Token::Number(_)) | Some(Token::RParen) => false,
        }
    };

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            if text.parse::<f64>().is_err() {
                return Err(CompileError::InvalidSyntax(format!("malformed number '{text}'")));
            }
            tokens.push(Token::Number(text));
            continue;
        }

        match c {
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '+' | '-' | '*' | '/' => {
                let op: Operator = c.to_string().parse().expect("valid operator char");
                if op == Operator::Sub && prev_allows_unary(&tokens) {
                    tokens.push(Token::Number("0".to_string()));
                }
                tokens.push(Token::Op(op));
            }
            other => {
                return Err(CompileError::InvalidSyntax(format!(
                    "unexpected character '{other}'"
                )))
            }
        }
        i += 1;
    }

    if tokens.is_empty() {
        return Err(CompileError::InvalidSyntax("empty expression".to_string()));
    }

    Ok(tokens)
}

fn precedence(op: Operator) -> u8 {
    match op {
        Operator::Add | Operator::Sub => 1,
        Operator::Mul | Operator::Div => 2,
    }
}

/// Shunting-yard: infix tokens to RPN.
fn to_rpn(tokens: Vec<Token>) -> Result<Vec<Token>, CompileError> {
    let mut output = Vec::new();
    let mut stack: Vec<Token> = Vec::new();

    for tok in tokens {
        match tok {
            Token::Number(_) => output.push(tok),
            Token::Op(op) => {
                while let Some(Token::Op(top)) = stack.last() {
                    if precedence(*top) >= precedence(op) {
                        output.push(stack.pop().unwrap());
                    } else {
                        break;
                    }
                }
                stack.push(Token::Op(op));
            }
            Token::LParen => stack.push(Token::LParen),
            Token::RParen => {
                loop {
                    match stack.pop() {
                        Some(Token::LParen) => break,
                        Some(other) => output.push(other),
                        None => {
                            return Err(CompileError::InvalidSyntax(
                                "mismatched parentheses".to_string(),
                            ))
                        }
                    }
                }
            }
        }
    }

    while let Some(tok) = stack.pop() {
        if tok == Token::LParen {
            return Err(CompileError::InvalidSyntax("mismatched parentheses".to_string()));
        }
        output.push(tok);
    }

    Ok(output)
}

/// The result of compiling one expression: its tasks and the id of the
/// terminal task (the one whose result is the expression's result).
pub struct CompiledExpression {
    pub tasks: Vec<Task>,
    pub terminal_task_id: Uuid,
}

/// Compile an infix expression into a task DAG.
///
/// Walks the RPN form with an operand stack: a numeric literal pushes its
/// text; an operator pops two operands (`arg1` = deeper, `arg2` = top),
/// allocates a fresh task id, records whichever operands are task ids as
/// `depends_on`, and pushes the new id. Fails `division_by_zero` only when
/// the right-hand operand is the literal `"0"` — a zero produced by a
/// computed subtask is only detected at runtime by the worker (§9).
pub fn compile(expression: &str, timings: &OperationTimings) -> Result<CompiledExpression, CompileError> {
    let tokens = tokenize(expression)?;
    let rpn = to_rpn(tokens)?;

    let mut operand_stack: Vec<String> = Vec::new();
    let mut tasks: Vec<Task> = Vec::new();

    for tok in rpn {
        match tok {
            Token::Number(text) => operand_stack.push(text),
            Token::Op(op) => {
                if operand_stack.len() < 2 {
                    return Err(CompileError::InvalidSyntax(
                        "not enough operands for operation".to_string(),
                    ));
                }
                let arg2 = operand_stack.pop().unwrap();
                let arg1 = operand_stack.pop().unwrap();

                if op == Operator::Div && arg2 == "0" {
                    return Err(CompileError::DivisionByZero);
                }

                let mut depends_on = Vec::new();
                if let Ok(id) = Uuid::parse_str(&arg1) {
                    depends_on.push(id);
                }
                if let Ok(id) = Uuid::parse_str(&arg2) {
                    depends_on.push(id);
                }

                let task_id = Uuid::new_v4();
                tasks.push(Task {
                    id: task_id,
                    expression_id: 0, // filled in once the expression row exists
                    arg1,
                    arg2,
                    operation: op,
                    op_time_ms: timings.for_op(op),
                    status: TaskStatus::Pending,
                    result: None,
                    depends_on,
                });
                operand_stack.push(task_id.to_string());
            }
            Token::LParen | Token::RParen => unreachable!("shunting-yard leaves no parens in RPN"),
        }
    }

    if operand_stack.len() != 1 {
        return Err(CompileError::InvalidSyntax("invalid expression format".to_string()));
    }

    // A bare literal (no operators at all, e.g. "42") produces no task —
    // reject it, since there is no task to schedule and no terminal.
    let terminal_task_id = match Uuid::parse_str(&operand_stack[0]) {
        Ok(id) => id,
        Err(_) => {
            return Err(CompileError::InvalidSyntax(
                "expression contains no operations".to_string(),
            ))
        }
    };

    debug_assert_eq!(terminal_id(&tasks), Some(terminal_task_id));

    Ok(CompiledExpression { tasks, terminal_task_id })
}

/// Identify the terminal task: the unique task that no other task in the
/// set depends on. Returns `None` if zero or more than one such task
/// exists — spec §9 treats that as an internal invariant violation rather
/// than guessing from insertion order.
pub fn terminal_id(tasks: &[Task]) -> Option<Uuid> {
    let all_ids: HashSet<Uuid> = tasks.iter().map(|t| t.id).collect();
    let depended_on: HashSet<Uuid> = tasks.iter().flat_map(|t| t.depends_on.iter().copied()).collect();
    let mut roots = all_ids.difference(&depended_on);
    let first = roots.next()?;
    if roots.next().is_some() {
        return None;
    }
    Some(*first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings() -> OperationTimings {
        OperationTimings::default()
    }

    #[test]
    fn simple_addition_produces_one_task() {
        let compiled = compile("2+3", &timings()).unwrap();
        assert_eq!(compiled.tasks.len(), 1);
        let task = &compiled.tasks[0];
        assert_eq!(task.arg1, "2");
        assert_eq!(task.arg2, "3");
        assert_eq!(task.operation, Operator::Add);
        assert!(task.depends_on.is_empty());
        assert_eq!(compiled.terminal_task_id, task.id);
    }

    #[test]
    fn parenthesized_multiply_depends_on_addition() {
        let compiled = compile("(2+3)*4", &timings()).unwrap();
        assert_eq!(compiled.tasks.len(), 2);
        let add = compiled.tasks.iter().find(|t| t.operation == Operator::Add).unwrap();
        let mul = compiled.tasks.iter().find(|t| t.operation == Operator::Mul).unwrap();
        assert_eq!(mul.depends_on, vec![add.id]);
        assert!(add.depends_on.is_empty());
        assert_eq!(compiled.terminal_task_id, mul.id);
    }

    #[test]
    fn two_additions_feed_one_multiplication() {
        let compiled = compile("((1+2)*(3+4))", &timings()).unwrap();
        assert_eq!(compiled.tasks.len(), 3);
        let mul = compiled.tasks.iter().find(|t| t.operation == Operator::Mul).unwrap();
        assert_eq!(mul.depends_on.len(), 2);
        assert_eq!(compiled.terminal_task_id, mul.id);
    }

    #[test]
    fn literal_division_by_zero_is_rejected_at_compile_time() {
        let err = compile("5/0", &timings()).unwrap_err();
        assert_eq!(err, CompileError::DivisionByZero);
    }

    #[test]
    fn doubled_operator_is_invalid_syntax() {
        let err = compile("2++3", &timings()).unwrap_err();
        assert!(matches!(err, CompileError::InvalidSyntax(_)));
    }

    #[test]
    fn unary_minus_at_start_is_accepted() {
        // "-5+3" -> (0-5)+3 -> one subtraction feeding one addition.
        let compiled = compile("-5+3", &timings()).unwrap();
        assert_eq!(compiled.tasks.len(), 2);
        let sub = compiled.tasks.iter().find(|t| t.operation == Operator::Sub).unwrap();
        assert_eq!(sub.arg1, "0");
        assert_eq!(sub.arg2, "5");
        let add = compiled.tasks.iter().find(|t| t.operation == Operator::Add).unwrap();
        assert_eq!(add.depends_on, vec![sub.id]);
    }

    #[test]
    fn double_unary_minus_behaves_as_documented() {
        // "-(-1)" -> 0-(0-1) -> two subtractions.
        let compiled = compile("-(-1)", &timings()).unwrap();
        assert!(compiled.tasks.iter().all(|t| t.operation == Operator::Sub));
        assert_eq!(compiled.tasks.len(), 2);
    }

    #[test]
    fn mismatched_parens_is_invalid_syntax() {
        let err = compile("(2+3", &timings()).unwrap_err();
        assert!(matches!(err, CompileError::InvalidSyntax(_)));
    }

    #[test]
    fn bare_literal_has_no_task_to_schedule() {
        let err = compile("42", &timings()).unwrap_err();
        assert!(matches!(err, CompileError::InvalidSyntax(_)));
    }

    #[test]
    fn terminal_id_rejects_ambiguous_forest() {
        use crate::model::TaskStatus;
        let a = Task {
            id: Uuid::new_v4(),
            expression_id: 0,
            arg1: "1".into(),
            arg2: "2".into(),
            operation: Operator::Add,
            op_time_ms: 1000,
            status: TaskStatus::Pending,
            result: None,
            depends_on: vec![],
        };
        let b = Task { id: Uuid::new_v4(), ..a.clone() };
        assert_eq!(terminal_id(&[a, b]), None);
    }
}
