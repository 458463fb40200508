/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! AST to IR lowering.
//!
//! Every expression value passes through XMM0 and the machine stack: a
//! producer leaves its result pushed (`F_PUSH`), a consumer pops it
//! (`F_POP`). Frames are classic `RBP`-based with 16-byte value slots;
//! arguments are pushed leftmost-first and the callee cleans them up with
//! `RET 16*num_params`.

use crate::ast::{Ast, AstNode, AstValue, Operation};
use crate::errors::CompilerError;
use crate::ir::label_table::{define_label, get_label, LabelTable};
use crate::ir::{
    IrList, IrNode, IrOp, IrOperand, IrRegister, RXX_REG_BYTES, XMM_SLOT_BYTES,
};
use crate::names::{LocalScope, LocalSlot, NameTable};

/// The lowered program: the instruction list plus the per-function scopes
/// referenced by the function names' `local_scope` handles.
#[derive(Debug)]
pub struct Lowered {
    pub ir: IrList,
    pub scopes: Vec<LocalScope>,
}

/// Lowers a parsed program. Emits the `_start` prelude, one frame per
/// function, and resolves every symbolic jump before returning.
pub fn lower(ast: &mut Ast) -> Result<Lowered, CompilerError> {
    let mut ctx = LoweringContext::new(&mut ast.names);

    ctx.emit_label("_start")?;
    ctx.emit(IrNode::jump(IrOp::Call, "main"));
    ctx.emit(IrNode::op0(IrOp::Hlt));

    ctx.build(ast.root.as_ref())?;

    if !ctx.labels.contains_key("main") {
        return Err(CompilerError::SemanticErrorNoLine {
            reason: "program defines no 'main' function".to_string(),
        });
    }

    ctx.patch_jumps()?;

    if log::log_enabled!(log::Level::Trace) {
        for id in ctx.ir.iter() {
            let node = ctx.ir.node(id);
            log::trace!(
                "ir {:>4}: {:?} {:?} {:?} label={:?} target={:?}",
                id,
                node.op,
                node.operand1,
                node.operand2,
                node.label,
                node.jump_target
            );
        }
    }

    log::debug!(
        "lowered {} IR nodes, {} labels, {} function scopes",
        ctx.ir.len(),
        ctx.labels.len(),
        ctx.scopes.len()
    );

    Ok(Lowered {
        ir: ctx.ir,
        scopes: ctx.scopes,
    })
}

struct LoweringContext<'a> {
    names: &'a mut NameTable,
    ir: IrList,
    labels: LabelTable,
    scopes: Vec<LocalScope>,
    current_scope: Option<usize>,

    label_id: usize,
    mem_shift: i64,
    reg_shift: IrRegister,
    num_params: usize,
}

impl<'a> LoweringContext<'a> {
    fn new(names: &'a mut NameTable) -> Self {
        LoweringContext {
            names,
            ir: IrList::new(),
            labels: LabelTable::new(),
            scopes: Vec::new(),
            current_scope: None,
            label_id: 0,
            mem_shift: 0,
            reg_shift: IrRegister::NoReg,
            num_params: 0,
        }
    }

    fn emit(&mut self, node: IrNode) {
        self.ir.push_back(node);
    }

    fn emit_label(&mut self, name: &str) -> Result<(), CompilerError> {
        let marker = self.ir.push_back(IrNode::label_mark(name));
        define_label(&mut self.labels, name, marker)
    }

    fn next_label_id(&mut self) -> usize {
        let id = self.label_id;
        self.label_id += 1;
        id
    }

    fn scope(&self) -> Result<&LocalScope, CompilerError> {
        let index = self
            .current_scope
            .ok_or_else(|| CompilerError::internal("statement outside of any function"))?;
        Ok(&self.scopes[index])
    }

    fn build(&mut self, node: Option<&AstNode>) -> Result<(), CompilerError> {
        let Some(node) = node else {
            return Ok(());
        };

        match &node.value {
            AstValue::Num(value) => {
                self.build_num(*value);
                Ok(())
            }
            AstValue::Name(id) => self.build_var(*id),
            AstValue::StringLiteral(_) => Err(CompilerError::internal(
                "string literal outside of a print statement",
            )),
            AstValue::Op(op) => self.build_operation(*op, node),
        }
    }

    fn build_operation(
        &mut self,
        op: Operation,
        node: &AstNode,
    ) -> Result<(), CompilerError> {
        match op {
            Operation::Add => self.build_alu(IrOp::FAdd, true, node),
            Operation::Sub => self.build_alu(IrOp::FSub, true, node),
            Operation::Mul => self.build_alu(IrOp::FMul, true, node),
            Operation::Div => self.build_alu(IrOp::FDiv, true, node),
            Operation::Pow => self.build_alu(IrOp::FPow, true, node),
            Operation::And => self.build_alu(IrOp::FAnd, true, node),
            Operation::Or => self.build_alu(IrOp::FOr, true, node),
            Operation::Sqrt => self.build_alu(IrOp::FSqrt, false, node),
            Operation::Sin => self.build_alu(IrOp::FSin, false, node),
            Operation::Cos => self.build_alu(IrOp::FCos, false, node),
            Operation::Tan => self.build_alu(IrOp::FTan, false, node),
            Operation::Cot => self.build_alu(IrOp::FCot, false, node),

            Operation::UnarySub => self.build_unary_sub(node),

            Operation::Less => self.build_comparison(IrOp::Jl, node),
            Operation::Greater => self.build_comparison(IrOp::Jg, node),
            Operation::LessEq => self.build_comparison(IrOp::Jle, node),
            Operation::GreaterEq => self.build_comparison(IrOp::Jge, node),
            Operation::Eq => self.build_comparison(IrOp::Je, node),
            Operation::NotEq => self.build_comparison(IrOp::Jne, node),

            Operation::NewFunc | Operation::Type | Operation::LineEnd => {
                self.build(node.left.as_deref())?;
                self.build(node.right.as_deref())
            }
            Operation::TypeInt => Ok(()),

            Operation::Func => self.build_func(node),
            Operation::FuncCall => self.build_func_call(node),
            Operation::If => self.build_if(node),
            Operation::While => self.build_while(node),
            Operation::Assign => self.build_assign(node),
            Operation::Return => self.build_return(node),
            Operation::Read => {
                self.emit(IrNode::op0(IrOp::FIn));
                Ok(())
            }
            Operation::Print => self.build_print(node),

            Operation::Comma => Err(CompilerError::internal(
                "COMMA node outside of a parameter or argument list",
            )),
        }
    }

    fn build_num(&mut self, value: i64) {
        self.emit(IrNode::op2(
            IrOp::FMov,
            IrOperand::Reg(IrRegister::Xmm0),
            IrOperand::Imm(value),
        ));
        self.emit(IrNode::op1(IrOp::FPush, IrOperand::Reg(IrRegister::Xmm0)));
    }

    fn build_var(&mut self, id: usize) -> Result<(), CompilerError> {
        let slot = self.scope()?.find(id).ok_or_else(|| {
            CompilerError::SemanticErrorNoLine {
                reason: format!("'{}' is not declared in this function", self.names.text(id)),
            }
        })?;
        let mem = IrOperand::Mem {
            base: slot.base_reg,
            disp: slot.mem_shift,
        };

        self.emit(IrNode::op2(IrOp::FMov, IrOperand::Reg(IrRegister::Xmm0), mem));
        self.emit(IrNode::op1(IrOp::FPush, IrOperand::Reg(IrRegister::Xmm0)));
        Ok(())
    }

    // Binary: pop rhs into XMM1, lhs into XMM0, combine, push XMM0.
    // Unary: pop into XMM0, apply, push.
    fn build_alu(
        &mut self,
        alu_op: IrOp,
        binary: bool,
        node: &AstNode,
    ) -> Result<(), CompilerError> {
        let xmm0 = IrOperand::Reg(IrRegister::Xmm0);
        let xmm1 = IrOperand::Reg(IrRegister::Xmm1);

        self.build(node.left.as_deref())?;

        if binary {
            self.build(node.right.as_deref())?;
            self.emit(IrNode::op1(IrOp::FPop, xmm1.clone()));
            self.emit(IrNode::op1(IrOp::FPop, xmm0.clone()));
            self.emit(IrNode::op2(alu_op, xmm0.clone(), xmm1));
        } else {
            self.emit(IrNode::op1(IrOp::FPop, xmm0.clone()));
            self.emit(IrNode::op1(alu_op, xmm0.clone()));
        }

        self.emit(IrNode::op1(IrOp::FPush, xmm0));
        Ok(())
    }

    // 0 - x, built from the registers alone.
    fn build_unary_sub(&mut self, node: &AstNode) -> Result<(), CompilerError> {
        let xmm0 = IrOperand::Reg(IrRegister::Xmm0);
        let xmm1 = IrOperand::Reg(IrRegister::Xmm1);

        self.build(node.left.as_deref())?;
        self.emit(IrNode::op1(IrOp::FPop, xmm1.clone()));
        self.emit(IrNode::op2(IrOp::FXor, xmm0.clone(), xmm0.clone()));
        self.emit(IrNode::op2(IrOp::FSub, xmm0.clone(), xmm1));
        self.emit(IrNode::op1(IrOp::FPush, xmm0));
        Ok(())
    }

    fn build_comparison(&mut self, jcc: IrOp, node: &AstNode) -> Result<(), CompilerError> {
        let xmm0 = IrOperand::Reg(IrRegister::Xmm0);
        let xmm1 = IrOperand::Reg(IrRegister::Xmm1);

        self.build(node.left.as_deref())?;
        self.build(node.right.as_deref())?;

        self.emit(IrNode::op1(IrOp::FPop, xmm1.clone()));
        self.emit(IrNode::op1(IrOp::FPop, xmm0.clone()));
        self.emit(IrNode::op2(IrOp::FCmp, xmm0.clone(), xmm1));

        let id = self.next_label_id();
        let push_true = format!("COMPARE_PUSH_1_{}", id);
        let end = format!("COMPARE_END_{}", id);

        self.emit(IrNode::jump(jcc, push_true.clone()));

        self.emit(IrNode::op2(IrOp::FXor, xmm0.clone(), xmm0.clone()));
        self.emit(IrNode::op1(IrOp::FPush, xmm0.clone()));
        self.emit(IrNode::jump(IrOp::Jmp, end.clone()));

        self.emit_label(&push_true)?;
        self.emit(IrNode::op2(IrOp::FMov, xmm0.clone(), IrOperand::Imm(1)));
        self.emit(IrNode::op1(IrOp::FPush, xmm0));
        self.emit_label(&end)
    }

    // Condition value compared against zero; zero comes from XMM1 because
    // COMISD takes registers only.
    fn emit_zero_test(&mut self, end_label: &str) {
        let xmm0 = IrOperand::Reg(IrRegister::Xmm0);
        let xmm1 = IrOperand::Reg(IrRegister::Xmm1);

        self.emit(IrNode::op1(IrOp::FPop, xmm0.clone()));
        self.emit(IrNode::op2(IrOp::FXor, xmm1.clone(), xmm1.clone()));
        self.emit(IrNode::op2(IrOp::FCmp, xmm0, xmm1));
        self.emit(IrNode::jump(IrOp::Je, end_label));
    }

    fn build_if(&mut self, node: &AstNode) -> Result<(), CompilerError> {
        let end = format!("END_IF_{}", self.next_label_id());

        self.build(node.left.as_deref())?;
        self.emit_zero_test(&end);
        self.build(node.right.as_deref())?;
        self.emit_label(&end)
    }

    fn build_while(&mut self, node: &AstNode) -> Result<(), CompilerError> {
        let id = self.next_label_id();
        let begin = format!("WHILE_{}", id);
        let end = format!("END_WHILE_{}", id);

        self.emit_label(&begin)?;
        self.build(node.left.as_deref())?;
        self.emit_zero_test(&end);
        self.build(node.right.as_deref())?;
        self.emit(IrNode::jump(IrOp::Jmp, begin));
        self.emit_label(&end)
    }

    fn build_assign(&mut self, node: &AstNode) -> Result<(), CompilerError> {
        let target = node.left.as_deref().ok_or_else(|| {
            CompilerError::internal("assignment without a target")
        })?;
        let AstValue::Name(id) = target.value else {
            return Err(CompilerError::internal("assignment target is not a name"));
        };

        let slot = self.scope()?.find(id).ok_or_else(|| {
            CompilerError::SemanticErrorNoLine {
                reason: format!("'{}' is not declared in this function", self.names.text(id)),
            }
        })?;
        let mem = IrOperand::Mem {
            base: slot.base_reg,
            disp: slot.mem_shift,
        };

        self.build(node.right.as_deref())?;

        self.emit(IrNode::op1(IrOp::FPop, IrOperand::Reg(IrRegister::Xmm0)));
        self.emit(IrNode::op2(IrOp::FMov, mem, IrOperand::Reg(IrRegister::Xmm0)));
        Ok(())
    }

    fn build_return(&mut self, node: &AstNode) -> Result<(), CompilerError> {
        self.build(node.left.as_deref())?;
        self.build_func_quit();
        Ok(())
    }

    fn build_func_quit(&mut self) {
        self.emit(IrNode::op1(IrOp::FPop, IrOperand::Reg(IrRegister::Xmm0)));
        self.emit(IrNode::op2(
            IrOp::Mov,
            IrOperand::Reg(IrRegister::Rsp),
            IrOperand::Reg(IrRegister::Rbp),
        ));
        self.emit(IrNode::op1(IrOp::Pop, IrOperand::Reg(IrRegister::Rbp)));
        self.emit(IrNode::op1(
            IrOp::Ret,
            IrOperand::Imm(self.num_params as i64 * XMM_SLOT_BYTES),
        ));
    }

    fn build_print(&mut self, node: &AstNode) -> Result<(), CompilerError> {
        let arg = node.left.as_deref().ok_or_else(|| {
            CompilerError::internal("print without an argument")
        })?;

        if let AstValue::StringLiteral(id) = arg.value {
            let text = self.names.text(id).to_string();
            self.emit(IrNode::op1(IrOp::StrOut, IrOperand::Str(text)));
            return Ok(());
        }

        self.build(Some(arg))?;
        self.emit(IrNode::op1(IrOp::FPop, IrOperand::Reg(IrRegister::Xmm0)));
        self.emit(IrNode::op1(IrOp::FOut, IrOperand::Reg(IrRegister::Xmm0)));
        Ok(())
    }

    fn build_func(&mut self, node: &AstNode) -> Result<(), CompilerError> {
        let name_node = node.left.as_deref().ok_or_else(|| {
            CompilerError::internal("function definition without a name")
        })?;
        let AstValue::Name(name_id) = name_node.value else {
            return Err(CompilerError::internal("function name is not a name node"));
        };

        let func_name = self.names.text(name_id).to_string();
        self.emit_label(&func_name)?;

        self.emit(IrNode::op1(IrOp::Push, IrOperand::Reg(IrRegister::Rbp)));
        self.emit(IrNode::op2(
            IrOp::Mov,
            IrOperand::Reg(IrRegister::Rbp),
            IrOperand::Reg(IrRegister::Rsp),
        ));

        let scope_index = self.scopes.len();
        self.scopes.push(LocalScope::new());
        self.current_scope = Some(scope_index);
        self.names.set_local_scope(name_id, scope_index);

        // Parameter slots start above the saved RBP and the return address.
        self.mem_shift = 2 * RXX_REG_BYTES;
        self.reg_shift = IrRegister::Rbp;
        self.num_params = self.init_func_params(name_node.left.as_deref())?;

        self.mem_shift = 0;
        let rsp_shift = self.init_func_locals(name_node.right.as_deref())?;
        self.emit(IrNode::op2(
            IrOp::Add,
            IrOperand::Reg(IrRegister::Rsp),
            IrOperand::Imm(rsp_shift),
        ));

        self.build(name_node.right.as_deref())
    }

    // Pascal layout: recurse into the right (later) parameter first so the
    // rightmost one lands nearest the frame base.
    fn init_func_params(&mut self, node: Option<&AstNode>) -> Result<usize, CompilerError> {
        let Some(node) = node else {
            return Ok(0);
        };

        match &node.value {
            AstValue::Name(id) => {
                let slot = LocalSlot {
                    name: *id,
                    mem_shift: self.mem_shift,
                    base_reg: self.reg_shift,
                };
                let scope = self.current_scope.ok_or_else(|| {
                    CompilerError::internal("parameter outside of any function")
                })?;
                self.scopes[scope].push(slot);
                Ok(1)
            }
            AstValue::Op(Operation::Comma) => {
                let count_right = self.init_func_params(node.right.as_deref())?;
                self.mem_shift += XMM_SLOT_BYTES;
                Ok(count_right + self.init_func_params(node.left.as_deref())?)
            }
            AstValue::Op(Operation::Type) => self.init_func_params(node.right.as_deref()),
            _ => Err(CompilerError::internal(
                "malformed parameter list in function definition",
            )),
        }
    }

    fn init_func_locals(&mut self, node: Option<&AstNode>) -> Result<i64, CompilerError> {
        let Some(node) = node else {
            return Ok(0);
        };

        if let AstValue::Op(Operation::Type) = node.value {
            let assign = node.right.as_deref().ok_or_else(|| {
                CompilerError::internal("variable definition without an initializer")
            })?;
            let name = assign.left.as_deref().ok_or_else(|| {
                CompilerError::internal("variable definition without a name")
            })?;
            let AstValue::Name(id) = name.value else {
                return Err(CompilerError::internal("variable name is not a name node"));
            };

            self.mem_shift -= XMM_SLOT_BYTES;
            let slot = LocalSlot {
                name: id,
                mem_shift: self.mem_shift,
                base_reg: self.reg_shift,
            };
            let scope = self.current_scope.ok_or_else(|| {
                CompilerError::internal("variable definition outside of any function")
            })?;
            self.scopes[scope].push(slot);

            return Ok(-XMM_SLOT_BYTES);
        }

        Ok(self.init_func_locals(node.left.as_deref())?
            + self.init_func_locals(node.right.as_deref())?)
    }

    fn build_func_call(&mut self, node: &AstNode) -> Result<(), CompilerError> {
        let name_node = node.left.as_deref().ok_or_else(|| {
            CompilerError::internal("function call without a callee")
        })?;
        let AstValue::Name(name_id) = name_node.value else {
            return Err(CompilerError::internal("callee is not a name node"));
        };

        // Registers are scratch across calls, nothing to save.
        if let Some(args) = name_node.left.as_deref() {
            self.push_call_args(args)?;
        }

        let func_name = self.names.text(name_id).to_string();
        self.emit(IrNode::jump(IrOp::Call, func_name));

        self.emit(IrNode::op1(IrOp::FPush, IrOperand::Reg(IrRegister::Xmm0)));
        Ok(())
    }

    // Leftmost argument first.
    fn push_call_args(&mut self, node: &AstNode) -> Result<(), CompilerError> {
        if let AstValue::Op(Operation::Comma) = node.value {
            let left = node.left.as_deref().ok_or_else(|| {
                CompilerError::internal("malformed argument list")
            })?;
            self.push_call_args(left)?;
            self.build(node.right.as_deref())
        } else {
            self.build(Some(node))
        }
    }

    fn patch_jumps(&mut self) -> Result<(), CompilerError> {
        let ids: Vec<_> = self.ir.iter().collect();

        for id in ids {
            let node = self.ir.node(id);
            if !node.need_patch || node.jump_target.is_some() {
                continue;
            }

            let Some(IrOperand::Label(name)) = node.operand1.clone() else {
                return Err(CompilerError::internal(format!(
                    "patchable {:?} node carries no label operand",
                    node.op
                )));
            };

            let marker = get_label(&self.labels, &name)?;
            let target = self.ir.next(marker);
            if target == 0 {
                return Err(CompilerError::internal(format!(
                    "label '{}' has no following instruction",
                    name
                )));
            }

            self.ir.node_mut(id).jump_target = Some(target);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn lower_source(source: &str) -> (Lowered, Ast) {
        let mut ast = parse_source(source).unwrap();
        let lowered = lower(&mut ast).unwrap();
        (lowered, ast)
    }

    fn ops(lowered: &Lowered) -> Vec<IrOp> {
        lowered
            .ir
            .iter()
            .map(|id| lowered.ir.node(id).op)
            .collect()
    }

    #[test]
    fn test_prelude_calls_main_then_halts() {
        let (lowered, _) = lower_source("575757 main 57 0 57 {");
        let ir = &lowered.ir;

        let nodes: Vec<_> = ir.iter().collect();
        assert_eq!(ir.node(nodes[0]).label.as_deref(), Some("_start"));
        assert_eq!(ir.node(nodes[1]).op, IrOp::Call);
        assert_eq!(ir.node(nodes[2]).op, IrOp::Hlt);

        // CALL main lands on the node right after the 'main' marker.
        let call = ir.node(nodes[1]);
        let target = call.jump_target.unwrap();
        assert_eq!(ir.node(target).op, IrOp::Push);
    }

    #[test]
    fn test_every_patched_jump_is_resolved() {
        let source = "575757 main 57 \
                      575757 i == 5 57 \
                      57! i 57 57 . i 57 i == i - 1 57 { \
                      57? i != 0 57 . 575 57 \
                      0 57 {";
        let (lowered, _) = lower_source(source);

        for id in lowered.ir.iter() {
            let node = lowered.ir.node(id);
            if node.need_patch {
                let target = node.jump_target.expect("unresolved patched jump");
                assert!(lowered.ir.iter().any(|other| other == target));
            }
        }
    }

    #[test]
    fn test_pascal_parameter_offsets() {
        let source = "575757 f 575757 a 575757 b 575757 c 57 a 57 { \
                      575757 main 57 f { 1 2 3 57 57 {";
        let (lowered, ast) = lower_source(source);

        let scope_handle = ast.names.get(ast.names.find("f").unwrap()).local_scope;
        let scope = &lowered.scopes[scope_handle.unwrap()];

        let offset = |name: &str| {
            scope
                .find(ast.names.find(name).unwrap())
                .expect("parameter is in scope")
                .mem_shift
        };

        // Rightmost parameter nearest the frame base.
        assert_eq!(offset("c"), 16);
        assert_eq!(offset("b"), 32);
        assert_eq!(offset("a"), 48);
    }

    #[test]
    fn test_locals_get_negative_offsets_and_frame_space() {
        let source = "575757 main 57 \
                      575757 x == 1 57 \
                      575757 y == 2 57 \
                      x 57 {";
        let (lowered, ast) = lower_source(source);

        let scope_handle = ast.names.get(ast.names.find("main").unwrap()).local_scope;
        let scope = &lowered.scopes[scope_handle.unwrap()];
        assert_eq!(scope.find(ast.names.find("x").unwrap()).unwrap().mem_shift, -16);
        assert_eq!(scope.find(ast.names.find("y").unwrap()).unwrap().mem_shift, -32);

        // The prologue reserves both slots at once: ADD RSP, -32.
        let reserve = lowered
            .ir
            .iter()
            .map(|id| lowered.ir.node(id))
            .find(|node| node.op == IrOp::Add)
            .unwrap();
        assert_eq!(reserve.operand2, Some(IrOperand::Imm(-32)));
    }

    #[test]
    fn test_ret_pops_all_parameter_slots() {
        let source = "575757 f 575757 a 575757 b 57 a 57 { \
                      575757 main 57 f { 1 2 57 57 {";
        let (lowered, _) = lower_source(source);

        let ret = lowered
            .ir
            .iter()
            .map(|id| lowered.ir.node(id))
            .find(|node| node.op == IrOp::Ret)
            .unwrap();
        assert_eq!(ret.operand1, Some(IrOperand::Imm(32)));
    }

    #[test]
    fn test_arguments_push_leftmost_first() {
        let source = "575757 f 575757 a 575757 b 57 a 57 { \
                      575757 main 57 f { 7 8 57 57 {";
        let (lowered, _) = lower_source(source);

        let immediates: Vec<i64> = lowered
            .ir
            .iter()
            .map(|id| lowered.ir.node(id))
            .filter(|node| node.op == IrOp::FMov)
            .filter_map(|node| match node.operand2 {
                Some(IrOperand::Imm(value)) => Some(value),
                _ => None,
            })
            .collect();

        let seven = immediates.iter().position(|&v| v == 7).unwrap();
        let eight = immediates.iter().position(|&v| v == 8).unwrap();
        assert!(seven < eight);
    }

    #[test]
    fn test_missing_main_is_rejected() {
        let mut ast = parse_source("575757 helper 57 0 57 {").unwrap();
        let err = lower(&mut ast).unwrap_err();
        assert!(
            matches!(err, CompilerError::SemanticErrorNoLine { .. }),
            "{err:?}"
        );
    }

    #[test]
    fn test_comparison_materialises_both_branches() {
        let (lowered, _) = lower_source("575757 main 57 1 = 2 57 {");
        let ops = ops(&lowered);

        // One conditional jump to the push-1 branch, one unconditional over it.
        assert!(ops.contains(&IrOp::Jne));
        assert!(ops.contains(&IrOp::Jmp));
        assert!(ops.contains(&IrOp::FXor));
        assert!(ops.contains(&IrOp::FCmp));
    }
}
