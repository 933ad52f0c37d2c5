//! Place lowering: access chains (`a[i].b[j].c`) and assignment targets.
//!
//! A chain rooted at a storage identifier lowers into a sequence of
//! `ComputeSlot` steps ending in a single storage read or write. Chains on
//! memory or calldata bases use `ComputeOffset`. Anything else is not a
//! place and is reported.

use bug_ast::{AstNode, Expr};
use bug_ir::{
    BinOp, ConstValue, DataLocation, InstructionKind, OffsetKind, SlotKind, Value,
};
use bug_reporting::{DiagnosticCode, Report};
use bug_types::{StorageClass, Ty};

use super::Builder;

/// A fully-lowered access path: where the value lives and how to reach it.
pub(crate) enum Place {
    /// A storage location at a computed 256-bit key.
    Storage { slot: Value, ty: Ty },
    /// A linear-memory location at a computed byte offset.
    Memory { offset: Value, ty: Ty },
    /// A region of the call's input data.
    Calldata { offset: Value, length: Option<Value>, ty: Ty },
    /// A block-local variable.
    Local { name: String, ty: Ty },
}

impl Builder<'_> {
    /// Lower an expression that denotes a place. Reports and returns [None]
    /// when the expression is not a supported access path.
    pub(crate) fn lower_place_expr(&mut self, node: &AstNode<Expr>) -> Option<Place> {
        match node.body() {
            Expr::Ident(name) => {
                let symbol = self.lookup(&name.ident, node.span())?;
                match symbol.class {
                    StorageClass::Storage => {
                        let slot = symbol.slot.expect("storage symbols always carry a slot");
                        Some(Place::Storage {
                            slot: Value::Const(ConstValue::uint(slot)),
                            ty: symbol.ty,
                        })
                    }
                    StorageClass::Local | StorageClass::Memory => {
                        Some(Place::Local { name: symbol.name, ty: symbol.ty })
                    }
                    StorageClass::Calldata => Some(Place::Calldata {
                        offset: Value::Const(ConstValue::uint(0)),
                        length: None,
                        ty: symbol.ty,
                    }),
                    StorageClass::Builtin => {
                        self.report(
                            Report::error(
                                DiagnosticCode::IrInvalidLvalue,
                                format!("`{}` is not a value", name.ident),
                            )
                            .with_span(node.span()),
                        );
                        None
                    }
                }
            }
            Expr::Index { object, index } => self.lower_index_place(object, index, node),
            Expr::Field { object, name } => self.lower_field_place(object, name, node),
            Expr::Slice { object, start, end } => self.lower_slice_place(object, start, end),
            Expr::Env(bug_ast::EnvOp::MsgData) => Some(Place::Calldata {
                offset: Value::Const(ConstValue::uint(0)),
                length: None,
                ty: Ty::Bytes { size: None },
            }),
            _ => {
                self.report(
                    Report::error(
                        DiagnosticCode::IrUnsupportedStoragePattern,
                        "expression does not denote a storage, memory or calldata location",
                    )
                    .with_span(node.span()),
                );
                None
            }
        }
    }

    fn lower_index_place(
        &mut self,
        object: &AstNode<Expr>,
        index: &AstNode<Expr>,
        node: &AstNode<Expr>,
    ) -> Option<Place> {
        let base = self.lower_base_place(object)?;

        match base {
            Place::Storage { slot, ty } => match ty {
                Ty::Mapping { key, value } => {
                    let key_value = self.lower_expr(index);
                    let derived = self.emit_value(
                        InstructionKind::ComputeSlot {
                            kind: SlotKind::Mapping { key: key_value, key_ty: (*key).clone() },
                            base: slot,
                        },
                        Ty::UINT256,
                    );
                    Some(Place::Storage { slot: derived, ty: (*value).clone() })
                }
                Ty::Array { element, size } => {
                    let stride = element.storage_slots();
                    let index_value = self.lower_expr(index);

                    // Dynamic array data starts at keccak256(base); fixed
                    // array data is laid out in place from the base slot.
                    let data_base = match size {
                        None => self.emit_value(
                            InstructionKind::ComputeSlot { kind: SlotKind::Array, base: slot },
                            Ty::UINT256,
                        ),
                        Some(_) => slot,
                    };

                    let scaled = self.scale_index(index_value, stride);
                    let derived = self.emit_value(
                        InstructionKind::BinaryOp { op: BinOp::Add, lhs: data_base, rhs: scaled },
                        Ty::UINT256,
                    );
                    Some(Place::Storage { slot: derived, ty: (*element).clone() })
                }
                ty => {
                    self.report_not_indexable(&ty, node);
                    None
                }
            },
            Place::Memory { offset, ty } => match ty {
                Ty::Array { element, size: Some(_) } => {
                    let stride = element.memory_size();
                    let index_value = self.lower_expr(index);
                    let derived = self.emit_value(
                        InstructionKind::ComputeOffset {
                            kind: OffsetKind::Array { index: index_value, stride },
                            location: DataLocation::Memory,
                            base: offset,
                        },
                        Ty::UINT256,
                    );
                    Some(Place::Memory { offset: derived, ty: (*element).clone() })
                }
                ty => {
                    self.report_not_indexable(&ty, node);
                    None
                }
            },
            Place::Calldata { offset, ty, .. } => match ty {
                Ty::Bytes { size: None } => {
                    let index_value = self.lower_expr(index);
                    let derived = self.emit_value(
                        InstructionKind::ComputeOffset {
                            kind: OffsetKind::Byte { offset: index_value },
                            location: DataLocation::Calldata,
                            base: offset,
                        },
                        Ty::UINT256,
                    );
                    Some(Place::Calldata {
                        offset: derived,
                        length: Some(Value::Const(ConstValue::uint(1))),
                        ty: Ty::Bytes { size: Some(1) },
                    })
                }
                ty => {
                    self.report_not_indexable(&ty, node);
                    None
                }
            },
            Place::Local { .. } => {
                self.report(
                    Report::error(
                        DiagnosticCode::IrUnsupportedStoragePattern,
                        "cannot index through a local intermediate",
                    )
                    .with_span(node.span()),
                );
                None
            }
        }
    }

    fn lower_field_place(
        &mut self,
        object: &AstNode<Expr>,
        name: &AstNode<bug_ast::Name>,
        node: &AstNode<Expr>,
    ) -> Option<Place> {
        let base = self.lower_base_place(object)?;

        match base {
            Place::Storage { slot, ty } => {
                let field = self.struct_field(&ty, &name.ident, node)?;
                let derived = self.emit_value(
                    InstructionKind::ComputeSlot {
                        kind: SlotKind::Field { offset: field.offset },
                        base: slot,
                    },
                    Ty::UINT256,
                );
                Some(Place::Storage { slot: derived, ty: field.ty })
            }
            Place::Memory { offset, ty } => {
                let field = self.struct_field(&ty, &name.ident, node)?;
                let derived = self.emit_value(
                    InstructionKind::ComputeOffset {
                        kind: OffsetKind::Field { name: name.ident.clone(), offset: field.offset },
                        location: DataLocation::Memory,
                        base: offset,
                    },
                    Ty::UINT256,
                );
                Some(Place::Memory { offset: derived, ty: field.ty })
            }
            _ => {
                self.report(
                    Report::error(
                        DiagnosticCode::IrUnsupportedStoragePattern,
                        "field access is only supported on storage and memory structs",
                    )
                    .with_span(node.span()),
                );
                None
            }
        }
    }

    fn lower_slice_place(
        &mut self,
        object: &AstNode<Expr>,
        start: &AstNode<Expr>,
        end: &AstNode<Expr>,
    ) -> Option<Place> {
        let base = self.lower_base_place(object)?;

        match base {
            Place::Calldata { offset, ty: Ty::Bytes { size: None }, .. } => {
                let start_value = self.lower_expr(start);
                let end_value = self.lower_expr(end);

                let from = self.emit_value(
                    InstructionKind::ComputeOffset {
                        kind: OffsetKind::Byte { offset: start_value.clone() },
                        location: DataLocation::Calldata,
                        base: offset,
                    },
                    Ty::UINT256,
                );
                let length = self.emit_value(
                    InstructionKind::BinaryOp { op: BinOp::Sub, lhs: end_value, rhs: start_value },
                    Ty::UINT256,
                );
                Some(Place::Calldata {
                    offset: from,
                    length: Some(length),
                    ty: Ty::Bytes { size: None },
                })
            }
            _ => {
                self.report(
                    Report::error(
                        DiagnosticCode::IrUnsupportedStoragePattern,
                        "slicing is only supported on calldata bytes",
                    )
                    .with_span(object.span()),
                );
                None
            }
        }
    }

    /// Lower the base of a chain step. Wraps [`Self::lower_place_expr`] so a
    /// non-place base (a call result, a literal) gets the storage-pattern
    /// diagnostic once, at the root.
    fn lower_base_place(&mut self, object: &AstNode<Expr>) -> Option<Place> {
        match object.body() {
            Expr::Ident(_)
            | Expr::Index { .. }
            | Expr::Field { .. }
            | Expr::Slice { .. }
            | Expr::Env(bug_ast::EnvOp::MsgData) => {
                let place = self.lower_place_expr(object)?;
                // A local holding a memory aggregate is a pointer into
                // memory; chase it so chains keep composing.
                match place {
                    Place::Local { name, ty } if is_memory_aggregate(&ty) => {
                        let pointer = Value::Local(name, Ty::UINT256);
                        Some(Place::Memory { offset: pointer, ty })
                    }
                    place => Some(place),
                }
            }
            _ => {
                self.report(
                    Report::error(
                        DiagnosticCode::IrUnsupportedStoragePattern,
                        "access chains must be rooted in a named location",
                    )
                    .with_span(object.span()),
                );
                None
            }
        }
    }

    /// Read a place into a value.
    pub(crate) fn read_place(&mut self, place: Place) -> Value {
        match place {
            Place::Storage { slot, ty } => {
                if !ty.is_word() {
                    return self.report_and_zero(Report::error(
                        DiagnosticCode::IrUnsupportedStoragePattern,
                        format!("`{ty}` cannot be loaded from storage as a value"),
                    ));
                }
                self.emit_value(
                    InstructionKind::Read {
                        location: DataLocation::Storage,
                        slot: Some(slot),
                        offset: Some(Value::Const(ConstValue::uint(0))),
                        length: Some(Value::Const(ConstValue::uint(32))),
                        name: None,
                        ty: ty.clone(),
                    },
                    ty,
                )
            }
            Place::Memory { offset, ty } => {
                if !ty.is_word() {
                    return self.report_and_zero(Report::error(
                        DiagnosticCode::IrUnsupportedStoragePattern,
                        format!("`{ty}` cannot be loaded from memory as a value"),
                    ));
                }
                self.emit_value(
                    InstructionKind::Read {
                        location: DataLocation::Memory,
                        slot: None,
                        offset: Some(offset),
                        length: Some(Value::Const(ConstValue::uint(32))),
                        name: None,
                        ty: ty.clone(),
                    },
                    ty,
                )
            }
            Place::Calldata { offset, length, ty } => self.emit_value(
                InstructionKind::Read {
                    location: DataLocation::Calldata,
                    slot: None,
                    offset: Some(offset),
                    length,
                    name: None,
                    ty: ty.clone(),
                },
                ty,
            ),
            Place::Local { name, ty } => Value::Local(name, ty),
        }
    }

    /// Write a value into a place.
    pub(crate) fn lower_assignment(&mut self, target: &AstNode<Expr>, value: Value) {
        let Some(place) = self.lower_place_expr(target) else { return };

        match place {
            Place::Storage { slot, ty } => {
                if !ty.is_word() && !matches!(ty, Ty::String | Ty::Bytes { size: None }) {
                    self.report(
                        Report::error(
                            DiagnosticCode::IrInvalidLvalue,
                            format!("`{ty}` cannot be stored as a whole"),
                        )
                        .with_span(target.span()),
                    );
                    return;
                }
                self.emit(
                    InstructionKind::Write {
                        location: DataLocation::Storage,
                        slot: Some(slot),
                        offset: Some(Value::Const(ConstValue::uint(0))),
                        length: Some(Value::Const(ConstValue::uint(32))),
                        value,
                        name: None,
                    },
                    None,
                );
            }
            Place::Memory { offset, ty } => {
                if !ty.is_word() {
                    self.report(
                        Report::error(
                            DiagnosticCode::IrInvalidLvalue,
                            format!("`{ty}` cannot be stored as a whole"),
                        )
                        .with_span(target.span()),
                    );
                    return;
                }
                self.emit(
                    InstructionKind::Write {
                        location: DataLocation::Memory,
                        slot: None,
                        offset: Some(offset),
                        length: Some(Value::Const(ConstValue::uint(32))),
                        value,
                        name: None,
                    },
                    None,
                );
            }
            Place::Local { name, .. } => self.write_local(&name, value),
            Place::Calldata { .. } => {
                self.report(
                    Report::error(
                        DiagnosticCode::IrInvalidLvalue,
                        "calldata is read-only",
                    )
                    .with_span(target.span()),
                );
            }
        }
    }

    fn scale_index(&mut self, index: Value, stride: u64) -> Value {
        if stride == 1 {
            return index;
        }
        self.emit_value(
            InstructionKind::BinaryOp {
                op: BinOp::Mul,
                lhs: index,
                rhs: Value::Const(ConstValue::uint(stride)),
            },
            Ty::UINT256,
        )
    }

    fn struct_field(
        &mut self,
        ty: &Ty,
        field_name: &str,
        node: &AstNode<Expr>,
    ) -> Option<bug_types::StructField> {
        match ty {
            Ty::Struct(def) => match def.field(field_name) {
                Some(field) => Some(field.clone()),
                None => {
                    self.report(
                        Report::error(
                            DiagnosticCode::IrUnknownIdentifier,
                            format!("`{}` has no field named `{field_name}`", def.name),
                        )
                        .with_span(node.span()),
                    );
                    None
                }
            },
            _ => {
                self.report(
                    Report::error(
                        DiagnosticCode::IrUnsupportedStoragePattern,
                        format!("`{ty}` has no fields"),
                    )
                    .with_span(node.span()),
                );
                None
            }
        }
    }

    fn report_not_indexable(&mut self, ty: &Ty, node: &AstNode<Expr>) {
        self.report(
            Report::error(
                DiagnosticCode::IrUnsupportedStoragePattern,
                format!("`{ty}` cannot be indexed here"),
            )
            .with_span(node.span()),
        );
    }
}

/// Aggregates that live in linear memory behind a pointer-valued local.
fn is_memory_aggregate(ty: &Ty) -> bool {
    matches!(ty, Ty::Struct(_) | Ty::Array { size: Some(_), .. })
}
