/* Appends an instruction to the open routine of a builder and fills its
 * operands from left to right. Operand expressions are evaluated before
 * the instruction is appended, so they may themselves emit code.
 */
macro_rules! emit {
    (@dyn $b:expr, $op:expr $(, $oper:expr)+ $(,)?) => {{
        let opers = [$($oper),+];
        let instr = $b.append($op);
        instr.oper[..opers.len()].copy_from_slice(&opers);
        instr
    }};
    (@dyn $b:expr, $op:expr) => {
        $b.append($op)
    };
    ($b:expr, $op:ident $(, $oper:expr)+ $(,)?) => {
        emit!(@dyn $b, $crate::opcodes::Opcode::$op $(, $oper)+)
    };
    ($b:expr, $op:ident) => {
        $b.append($crate::opcodes::Opcode::$op)
    };
}

macro_rules! label {
    ($r:expr) => {
        $crate::instructions::Operand::Label($r)
    };
}

macro_rules! num {
    ($n:expr) => {
        $crate::instructions::Operand::Num($n as u32)
    };
}

macro_rules! arg {
    ($n:expr) => {
        $crate::instructions::Operand::Arg($n)
    };
}

macro_rules! temp {
    ($n:expr) => {
        $crate::instructions::Operand::Temp($n)
    };
}

macro_rules! var {
    ($n:expr) => {
        $crate::instructions::Operand::Var($n)
    };
}
