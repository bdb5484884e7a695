//! Static metadata for every instruction kind of the intermediate code.
//!
//! Later stages never switch on concrete opcodes to reason about control
//! flow. They ask the table instead: does the instruction carry a sub-op,
//! can it fail, is it a conditional branch, does it end its routine.

use std::fmt;
use std::mem;

use strum::EnumCount;
use strum_macros::{EnumCount, EnumIter, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpFlags(u8);

impl OpFlags {
    pub const NONE: OpFlags = OpFlags(0);
    pub const SUBOP: OpFlags = OpFlags(0x01);
    pub const CAN_FAIL: OpFlags = OpFlags(0x02);
    pub const BRANCH: OpFlags = OpFlags(0x04);
    pub const ENDS_ROUTINE: OpFlags = OpFlags(0x08);

    #[inline]
    pub const fn union(self, other: OpFlags) -> OpFlags {
        OpFlags(self.0 | other.0)
    }

    #[inline]
    pub const fn intersects(self, other: OpFlags) -> bool {
        self.0 & other.0 != 0
    }
}

/// Instruction kinds of the abstract machine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoStaticStr, EnumIter, EnumCount,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Opcode {
    Allocate,
    Assign,
    BeginBox,
    Breakpoint,
    Builtin,
    CheckIndex,
    CheckWordmap,
    ClrallOflag,
    ClrallOvar,
    CollectBegin,
    CollectCheck,
    CollectEnd,
    CollectMatchAll,
    CollectPush,
    ComputeR,
    ComputeV,
    CutChoice,
    Deallocate,
    EndBox,
    FirstChild,
    FirstOflag,
    ForWords,
    GetGvarR,
    GetGvarV,
    GetInput,
    GetKey,
    GetOvarR,
    GetOvarV,
    GetPairRr,
    GetPairRv,
    GetPairVr,
    GetPairVv,
    GetRawInput,
    IfBound,
    IfGreater,
    IfHaveUndo,
    IfMatch,
    IfNil,
    IfNum,
    IfObj,
    IfPair,
    IfUnify,
    IfWord,
    IfGflag,
    IfOflag,
    IfGvarEq,
    IfOvarEq,
    InvokeMulti,
    InvokeOnce,
    InvokeTailMulti,
    InvokeTailOnce,
    Jump,
    MakePairRr,
    MakePairRv,
    MakePairVr,
    MakePairVv,
    MakeVar,
    NextChildPush,
    NextObjPush,
    NextOflagPush,
    Nop,
    NopDebug,
    PopChoice,
    PopStop,
    PrepareIndex,
    PrintVal,
    PrintWords,
    Proceed,
    PushChoice,
    PushStop,
    Quit,
    Restart,
    Restore,
    RestoreChoice,
    SaveChoice,
    Save,
    SaveUndo,
    Select,
    SetCont,
    SetGflag,
    SetGvar,
    SetOflag,
    SetOvar,
    SplitList,
    Stop,
    Tracepoint,
    Transcript,
    Undo,
    Unify,
}

assert_eq_size!(Opcode, u8);
const_assert!(Opcode::COUNT <= 256);

impl Opcode {
    pub const fn flags(self) -> OpFlags {
        use Opcode::*;

        const SUBOP: OpFlags = OpFlags::SUBOP;
        const CAN_FAIL: OpFlags = OpFlags::CAN_FAIL;
        const BRANCH: OpFlags = OpFlags::BRANCH;
        const ENDS: OpFlags = OpFlags::ENDS_ROUTINE;

        match self {
            BeginBox => SUBOP.union(CAN_FAIL),
            Breakpoint => ENDS,
            CollectCheck | CollectEnd | CollectMatchAll => CAN_FAIL,
            ComputeR | ComputeV => CAN_FAIL.union(SUBOP),
            Deallocate | EndBox | ForWords | PrintWords | Select => SUBOP,
            SetGflag | SetOflag | Tracepoint => SUBOP,
            FirstChild | FirstOflag => CAN_FAIL,
            GetGvarR | GetGvarV | GetOvarR | GetOvarV => CAN_FAIL,
            GetPairRr | GetPairRv | GetPairVr | GetPairVv => CAN_FAIL,
            GetInput | GetKey | GetRawInput => CAN_FAIL.union(ENDS),
            IfBound | IfGreater | IfHaveUndo | IfMatch | IfNil | IfNum | IfObj | IfPair
            | IfUnify | IfWord | IfGflag | IfOflag | IfGvarEq | IfOvarEq => BRANCH,
            InvokeMulti | InvokeOnce | InvokeTailMulti => ENDS,
            InvokeTailOnce | Proceed => SUBOP.union(ENDS),
            Jump | Quit | Restart | Stop => ENDS,
            Save | SaveUndo => CAN_FAIL.union(ENDS),
            Transcript | Undo | Unify => CAN_FAIL,
            Allocate | Assign | Builtin | CheckIndex | CheckWordmap | ClrallOflag | ClrallOvar
            | CollectBegin | CollectPush | CutChoice | MakePairRr | MakePairRv | MakePairVr
            | MakePairVv | MakeVar | NextChildPush | NextObjPush | NextOflagPush | Nop
            | NopDebug | PopChoice | PopStop | PrepareIndex | PrintVal | PushChoice | PushStop
            | Restore | RestoreChoice | SaveChoice | SetCont | SetGvar | SetOvar | SplitList => {
                OpFlags::NONE
            }
        }
    }

    #[inline]
    pub const fn has_subop(self) -> bool {
        self.flags().intersects(OpFlags::SUBOP)
    }

    #[inline]
    pub const fn can_fail(self) -> bool {
        self.flags().intersects(OpFlags::CAN_FAIL)
    }

    #[inline]
    pub const fn is_branch(self) -> bool {
        self.flags().intersects(OpFlags::BRANCH)
    }

    #[inline]
    pub const fn ends_routine(self) -> bool {
        self.flags().intersects(OpFlags::ENDS_ROUTINE)
    }

    #[inline]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Pair construction, specialised on which components are fresh
    /// variables that the instruction must create.
    #[inline]
    pub const fn make_pair(fresh_head: bool, fresh_tail: bool) -> Opcode {
        match (fresh_head, fresh_tail) {
            (false, false) => Opcode::MakePairVv,
            (false, true) => Opcode::MakePairVr,
            (true, false) => Opcode::MakePairRv,
            (true, true) => Opcode::MakePairRr,
        }
    }

    /// Pair destructuring. A fresh component is written to its operand, a
    /// known one is unified with the corresponding half of the pair.
    #[inline]
    pub const fn get_pair(fresh_head: bool, fresh_tail: bool) -> Opcode {
        match (fresh_head, fresh_tail) {
            (false, false) => Opcode::GetPairVv,
            (false, true) => Opcode::GetPairVr,
            (true, false) => Opcode::GetPairRv,
            (true, true) => Opcode::GetPairRr,
        }
    }

    #[inline]
    pub const fn is_invoke(self) -> bool {
        matches!(
            self,
            Opcode::InvokeOnce | Opcode::InvokeMulti | Opcode::InvokeTailOnce | Opcode::InvokeTailMulti
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

const_assert!(mem::size_of::<OpFlags>() == 1);
