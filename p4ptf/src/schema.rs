/*
Copyright (c) 2021 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! The P4Info schema: name and id resolution, and builders that turn
//! symbolic table, action and field names into P4Runtime entities.

use itertools::Itertools;

use proto::p4info;
use proto::p4types;

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{P4Error, Result};
use crate::runtime;
use crate::wire::{self, Value};

/// Deepest message nesting accepted in P4Info text.
const MAX_NESTING: usize = 64;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceLocation {
    file: String,
    line: i32,
    column: i32,
}

impl From<&p4types::SourceLocation> for SourceLocation {
    fn from(s: &p4types::SourceLocation) -> Self {
        SourceLocation {
            file: s.get_file().into(),
            line: s.get_line(),
            column: s.get_column(),
        }
    }
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file)?;
        if self.line != 0 {
            write!(f, ":{}", self.line)?;
            if self.column != 0 {
                write!(f, ":{}", self.column)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expression {
    String(String),
    Integer(i64),
    Bool(bool),
}

impl TryFrom<&p4types::Expression> for Expression {
    type Error = P4Error;

    fn try_from(e: &p4types::Expression) -> Result<Self> {
        use p4types::Expression_oneof_value::*;
        match e.value {
            Some(string_value(ref s)) => Ok(Expression::String(s.clone())),
            Some(int64_value(i)) => Ok(Expression::Integer(i)),
            Some(bool_value(b)) => Ok(Expression::Bool(b)),
            None => Err(P4Error::schema("annotation expression has no value")),
        }
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::String(s) => write!(f, "\"{}\"", s.escape_debug()),
            Expression::Integer(i) => write!(f, "{}", i),
            Expression::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValuePair(String, Expression);

impl TryFrom<&p4types::KeyValuePair> for KeyValuePair {
    type Error = P4Error;

    fn try_from(kvp: &p4types::KeyValuePair) -> Result<Self> {
        if !kvp.has_value() {
            return Err(P4Error::schema(format!(
                "annotation key {:?} has no value",
                kvp.get_key()
            )));
        }
        Ok(KeyValuePair(kvp.get_key().into(), kvp.get_value().try_into()?))
    }
}

impl Display for KeyValuePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.0.escape_debug(), self.1)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnnotationValue {
    Empty,
    Unstructured(String),
    Expressions(Vec<Expression>),
    KeyValuePairs(Vec<KeyValuePair>),
}

impl TryFrom<&p4types::StructuredAnnotation> for AnnotationValue {
    type Error = P4Error;

    fn try_from(sa: &p4types::StructuredAnnotation) -> Result<Self> {
        if sa.has_expression_list() {
            Ok(AnnotationValue::Expressions(
                sa.get_expression_list()
                    .get_expressions()
                    .iter()
                    .map(Expression::try_from)
                    .collect::<Result<_>>()?,
            ))
        } else if sa.has_kv_pair_list() {
            Ok(AnnotationValue::KeyValuePairs(
                sa.get_kv_pair_list()
                    .get_kv_pairs()
                    .iter()
                    .map(KeyValuePair::try_from)
                    .collect::<Result<_>>()?,
            ))
        } else {
            Ok(AnnotationValue::Empty)
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Annotations(HashMap<String, (Option<SourceLocation>, AnnotationValue)>);

impl Annotations {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&AnnotationValue> {
        self.0.get(name).map(|(_, v)| v)
    }
}

fn parse_annotations<'a, T, U, V>(
    annotations: T,
    annotation_locs: U,
    structured_annotations: V,
) -> Result<Annotations>
where
    T: IntoIterator<Item = &'a String>,
    U: IntoIterator<Item = &'a p4types::SourceLocation>,
    V: IntoIterator<Item = &'a p4types::StructuredAnnotation>,
{
    use AnnotationValue::*;

    // The annotation locations are optional.  Extend them so that we
    // always have one to match up with the annotations.
    let extended_annotation_locs = annotation_locs
        .into_iter()
        .map(|a| Some(a.into()))
        .chain(std::iter::repeat(None));
    let mut parsed: HashMap<String, (Option<SourceLocation>, AnnotationValue)> = annotations
        .into_iter()
        .zip(extended_annotation_locs)
        .map(|(s, source_location)| {
            let s = s.trim_start_matches('@');
            match s.strip_suffix(')').and_then(|s| s.split_once('(')) {
                Some((name, value)) => (name.into(), (source_location, Unstructured(value.into()))),
                None => (s.into(), (source_location, Empty)),
            }
        })
        .collect();
    for sa in structured_annotations {
        let source_location = if sa.has_source_location() {
            Some(sa.get_source_location().into())
        } else {
            None
        };
        parsed.insert(sa.get_name().into(), (source_location, sa.try_into()?));
    }
    Ok(Annotations(parsed))
}

fn format_structured_annotation<T, U>(f: &mut fmt::Formatter<'_>, values: T) -> fmt::Result
where
    T: Iterator<Item = U>,
    U: Display,
{
    write!(f, "[{}]", values.format(", "))
}

impl Display for Annotations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Sort annotations by name to ensure predictable output.
        let sorted_annotations = self.0.iter().sorted_by(|a, b| a.0.cmp(b.0));
        for (i, (k, (_, v))) in sorted_annotations.enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "@{}", k)?;

            use AnnotationValue::*;
            match v {
                Empty => (),
                Unstructured(s) => write!(f, "({})", s.escape_debug())?,
                Expressions(expressions) => format_structured_annotation(f, expressions.iter())?,
                KeyValuePairs(kvp) => format_structured_annotation(f, kvp.iter())?,
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Documentation {
    pub brief: String,
    pub description: String,
}

impl From<&p4info::Documentation> for Documentation {
    fn from(d: &p4info::Documentation) -> Self {
        Documentation {
            brief: d.get_brief().into(),
            description: d.get_description().into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Preamble {
    pub id: u32,
    pub name: String,
    pub alias: String,
    pub annotations: Annotations,
    pub doc: Documentation,
}

impl Preamble {
    /// Match fields, action parameters and packet metadata carry the
    /// preamble's fields inline, without an alias, so they are built
    /// through here too.
    fn new(
        id: u32,
        name: &str,
        alias: &str,
        annotations: Annotations,
        doc: Documentation,
    ) -> Result<Self> {
        if id == 0 {
            return Err(P4Error::schema(format!("{:?}: missing id", name)));
        }
        if name.is_empty() {
            return Err(P4Error::schema(format!("id {}: missing name", id)));
        }
        Ok(Preamble {
            id,
            name: name.into(),
            alias: if alias.is_empty() { name } else { alias }.into(),
            annotations,
            doc,
        })
    }
}

impl TryFrom<&p4info::Preamble> for Preamble {
    type Error = P4Error;

    fn try_from(p: &p4info::Preamble) -> Result<Self> {
        Preamble::new(
            p.get_id(),
            p.get_name(),
            p.get_alias(),
            parse_annotations(
                p.get_annotations(),
                p.get_annotation_locations(),
                p.get_structured_annotations(),
            )?,
            p.get_doc().into(),
        )
    }
}

fn preamble_of(what: &str, has_preamble: bool, p: &p4info::Preamble) -> Result<Preamble> {
    if !has_preamble {
        return Err(P4Error::schema(format!("{} without a preamble", what)));
    }
    p.try_into()
}

fn parse_type_name(pnto: Option<&p4types::P4NamedType>) -> Option<String> {
    pnto.map(|pnt| pnt.get_name().into())
}

fn bit_width_of(name: &str, bit_width: i32) -> Result<u32> {
    match u32::try_from(bit_width) {
        Ok(w) if w > 0 && w <= wire::MAX_BIT_WIDTH => Ok(w),
        _ => Err(P4Error::schema(format!(
            "{:?}: unsupported bit width {}",
            name, bit_width
        ))),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchType {
    Unspecified,
    Exact,
    Lpm,
    Ternary,
    Range,
    Optional,
    Other(String),
}

impl Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use MatchType::*;
        let s = match self {
            Unspecified => "unspecified",
            Exact => "exact",
            Lpm => "LPM",
            Ternary => "ternary",
            Range => "range",
            Optional => "optional",
            Other(s) => s,
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchField {
    // The P4Info representation of MatchField doesn't include a
    // Preamble but it includes everything in the preamble except
    // 'alias'.  It seems more uniform to just use Preamble here.
    pub preamble: Preamble,
    pub bit_width: u32,
    pub match_type: MatchType,
    pub type_name: Option<String>,
}

impl TryFrom<&p4info::MatchField> for MatchField {
    type Error = P4Error;

    fn try_from(mf: &p4info::MatchField) -> Result<Self> {
        use p4info::MatchField_MatchType::*;
        Ok(MatchField {
            preamble: Preamble::new(
                mf.get_id(),
                mf.get_name(),
                "",
                parse_annotations(
                    mf.get_annotations(),
                    mf.get_annotation_locations(),
                    mf.get_structured_annotations(),
                )?,
                mf.get_doc().into(),
            )?,
            bit_width: bit_width_of(mf.get_name(), mf.get_bitwidth())?,
            match_type: match mf.get_match_type() {
                EXACT => MatchType::Exact,
                LPM => MatchType::Lpm,
                TERNARY => MatchType::Ternary,
                RANGE => MatchType::Range,
                OPTIONAL => MatchType::Optional,
                UNSPECIFIED => {
                    if mf.has_other_match_type() {
                        MatchType::Other(mf.get_other_match_type().into())
                    } else {
                        MatchType::Unspecified
                    }
                }
            },
            type_name: parse_type_name(mf.type_name.as_ref()),
        })
    }
}

impl Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field {}: bit<{}>", self.preamble.name, self.bit_width)?;
        if let Some(ref type_name) = self.type_name {
            write!(f, " ({})", type_name.escape_debug())?;
        }
        write!(f, " {}-match", self.match_type)?;
        if !self.preamble.annotations.is_empty() {
            write!(f, " {}", self.preamble.annotations)?;
        };
        Ok(())
    }
}

/// An action parameter or a controller packet metadata field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    pub preamble: Preamble,
    pub bit_width: u32,
    pub type_name: Option<String>,
}

impl TryFrom<&p4info::Action_Param> for Param {
    type Error = P4Error;

    fn try_from(ap: &p4info::Action_Param) -> Result<Self> {
        Ok(Param {
            preamble: Preamble::new(
                ap.get_id(),
                ap.get_name(),
                "",
                parse_annotations(
                    ap.get_annotations(),
                    ap.get_annotation_locations(),
                    ap.get_structured_annotations(),
                )?,
                ap.get_doc().into(),
            )?,
            bit_width: bit_width_of(ap.get_name(), ap.get_bitwidth())?,
            type_name: parse_type_name(ap.type_name.as_ref()),
        })
    }
}

impl TryFrom<&p4info::ControllerPacketMetadata_Metadata> for Param {
    type Error = P4Error;

    fn try_from(m: &p4info::ControllerPacketMetadata_Metadata) -> Result<Self> {
        Ok(Param {
            preamble: Preamble::new(
                m.get_id(),
                m.get_name(),
                "",
                parse_annotations(
                    m.get_annotations(),
                    m.get_annotation_locations(),
                    m.get_structured_annotations(),
                )?,
                Documentation::default(),
            )?,
            bit_width: bit_width_of(m.get_name(), m.get_bitwidth())?,
            type_name: parse_type_name(m.type_name.as_ref()),
        })
    }
}

impl Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: bit<{}>", self.preamble.name, self.bit_width)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Action {
    pub preamble: Preamble,
    pub params: Vec<Param>,
}

impl TryFrom<&p4info::Action> for Action {
    type Error = P4Error;

    fn try_from(a: &p4info::Action) -> Result<Self> {
        let preamble = preamble_of("action", a.has_preamble(), a.get_preamble())?;
        let params: Vec<Param> = a
            .get_params()
            .iter()
            .map(Param::try_from)
            .collect::<Result<_>>()?;
        let scope = format!("action {}", preamble.name);
        check_unique(&scope, "parameter", params.iter().map(|p| &p.preamble))?;
        Ok(Action { preamble, params })
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action {}({})", self.preamble.name, self.params.iter().format(", "))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionRef {
    pub action: Action,
    pub may_be_default: bool, // Allowed as the default action?
    pub may_be_entry: bool,   // Allowed as an entry's action?
    pub annotations: Annotations,
}

impl ActionRef {
    fn new_from_proto(
        table: &Preamble,
        ar: &p4info::ActionRef,
        actions: &HashMap<u32, Action>,
    ) -> Result<Self> {
        let action = actions.get(&ar.get_id()).ok_or_else(|| {
            P4Error::schema(format!(
                "table {}: reference to unknown action {}",
                table.name,
                ar.get_id()
            ))
        })?;
        Ok(ActionRef {
            action: action.clone(),
            may_be_default: ar.get_scope() != p4info::ActionRef_Scope::TABLE_ONLY,
            may_be_entry: ar.get_scope() != p4info::ActionRef_Scope::DEFAULT_ONLY,
            annotations: parse_annotations(
                ar.get_annotations(),
                ar.get_annotation_locations(),
                ar.get_structured_annotations(),
            )?,
        })
    }
}

impl Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.may_be_entry {
            write!(f, "default-only ")?;
        } else if !self.may_be_default {
            write!(f, "not-default ")?;
        }
        write!(f, "{}", self.action)?;
        if !self.annotations.is_empty() {
            write!(f, " {}", self.annotations)?;
        };
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Table {
    pub preamble: Preamble,
    pub match_fields: Vec<MatchField>,
    pub actions: Vec<ActionRef>,
    pub const_default_action: Option<Action>,
    /// Id of the action profile that implements the table, if any.
    pub implementation_id: Option<u32>,
    pub direct_resource_ids: Vec<u32>,
    pub max_entries: Option<u64>,
    pub idle_notify: bool,
    pub is_const_table: bool,
}

impl Table {
    fn new_from_proto(t: &p4info::Table, actions: &HashMap<u32, Action>) -> Result<Self> {
        let preamble = preamble_of("table", t.has_preamble(), t.get_preamble())?;
        let scope = format!("table {}", preamble.name);
        let match_fields: Vec<MatchField> = t
            .get_match_fields()
            .iter()
            .map(MatchField::try_from)
            .collect::<Result<_>>()?;
        check_unique(&scope, "match field", match_fields.iter().map(|mf| &mf.preamble))?;
        let const_default_action = match t.get_const_default_action_id() {
            0 => None,
            id => Some(
                actions
                    .get(&id)
                    .ok_or_else(|| {
                        P4Error::schema(format!("{}: unknown const default action {}", scope, id))
                    })?
                    .clone(),
            ),
        };
        let actions: Vec<ActionRef> = t
            .get_action_refs()
            .iter()
            .map(|x| ActionRef::new_from_proto(&preamble, x, actions))
            .collect::<Result<_>>()?;
        Ok(Table {
            preamble,
            match_fields,
            actions,
            const_default_action,
            implementation_id: match t.get_implementation_id() {
                0 => None,
                id => Some(id),
            },
            direct_resource_ids: t.get_direct_resource_ids().to_vec(),
            max_entries: if t.get_size() > 0 {
                Some(t.get_size() as u64)
            } else {
                None
            },
            idle_notify: t.get_idle_timeout_behavior()
                == p4info::Table_IdleTimeoutBehavior::NOTIFY_CONTROL,
            is_const_table: t.get_is_const_table(),
        })
    }

    /// Entries in a table with a ternary, range or optional field must
    /// carry a priority.
    pub fn requires_priority(&self) -> bool {
        self.match_fields.iter().any(|mf| {
            matches!(
                mf.match_type,
                MatchType::Ternary | MatchType::Range | MatchType::Optional
            )
        })
    }

    fn action_ref(&self, action_id: u32) -> Option<&ActionRef> {
        self.actions.iter().find(|ar| ar.action.preamble.id == action_id)
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table {}:", self.preamble.name)?;
        for mf in &self.match_fields {
            write!(f, "\t{}", mf)?;
        }
        for ar in &self.actions {
            write!(f, "\t{}", ar)?;
        }
        if let Some(max_entries) = self.max_entries {
            write!(f, "\tsize: {}", max_entries)?;
        }
        if let Some(a) = &self.const_default_action {
            write!(f, "\tconst default action {}", a)?;
        }
        if self.is_const_table {
            write!(f, "\tconst table")?;
        }
        if self.idle_notify {
            write!(f, "\tidle notify")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionProfile {
    pub preamble: Preamble,
    pub table_ids: Vec<u32>,
    pub with_selector: bool,
    pub size: i64,
    /// Maximum total member weight in one group; 0 means no limit.
    pub max_group_size: i32,
}

impl TryFrom<&p4info::ActionProfile> for ActionProfile {
    type Error = P4Error;

    fn try_from(ap: &p4info::ActionProfile) -> Result<Self> {
        Ok(ActionProfile {
            preamble: preamble_of("action profile", ap.has_preamble(), ap.get_preamble())?,
            table_ids: ap.get_table_ids().to_vec(),
            with_selector: ap.get_with_selector(),
            size: ap.get_size(),
            max_group_size: ap.get_max_group_size(),
        })
    }
}

impl Display for ActionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action profile {}", self.preamble.name)?;
        if self.with_selector {
            write!(f, " with selector")?;
        }
        write!(f, " (size {})", self.size)
    }
}

/// The metadata header of packet-ins (`packet_in`) or packet-outs
/// (`packet_out`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerPacketMetadata {
    pub preamble: Preamble,
    pub metadata: Vec<Param>,
}

impl TryFrom<&p4info::ControllerPacketMetadata> for ControllerPacketMetadata {
    type Error = P4Error;

    fn try_from(cpm: &p4info::ControllerPacketMetadata) -> Result<Self> {
        let preamble = preamble_of(
            "controller packet metadata",
            cpm.has_preamble(),
            cpm.get_preamble(),
        )?;
        let metadata: Vec<Param> = cpm
            .get_metadata()
            .iter()
            .map(Param::try_from)
            .collect::<Result<_>>()?;
        check_unique(&preamble.name, "metadata field", metadata.iter().map(|p| &p.preamble))?;
        Ok(ControllerPacketMetadata { preamble, metadata })
    }
}

impl Display for ControllerPacketMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.preamble.name, self.metadata.iter().format(", "))
    }
}

/// Categories of named P4Info objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Table,
    Action,
    ActionProfile,
    Counter,
    DirectCounter,
    Meter,
    DirectMeter,
    Register,
    Digest,
    ControllerPacketMetadata,
    /// Scoped to a table.
    MatchField,
    /// Scoped to an action.
    ActionParam,
    /// Scoped to a controller packet metadata header.
    PacketMetadata,
}

impl EntityKind {
    /// The kinds with globally unique names and ids.
    const TOP_LEVEL: [EntityKind; 10] = [
        EntityKind::Table,
        EntityKind::Action,
        EntityKind::ActionProfile,
        EntityKind::Counter,
        EntityKind::DirectCounter,
        EntityKind::Meter,
        EntityKind::DirectMeter,
        EntityKind::Register,
        EntityKind::Digest,
        EntityKind::ControllerPacketMetadata,
    ];
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use EntityKind::*;
        let s = match self {
            Table => "table",
            Action => "action",
            ActionProfile => "action profile",
            Counter => "counter",
            DirectCounter => "direct counter",
            Meter => "meter",
            DirectMeter => "direct meter",
            Register => "register",
            Digest => "digest",
            ControllerPacketMetadata => "controller packet metadata",
            MatchField => "match field",
            ActionParam => "action parameter",
            PacketMetadata => "packet metadata field",
        };
        write!(f, "{}", s)
    }
}

fn check_unique<'a, I>(owner: &str, what: &str, preambles: I) -> Result<()>
where
    I: IntoIterator<Item = &'a Preamble>,
{
    let mut names = HashMap::new();
    let mut ids = HashMap::new();
    for p in preambles {
        if names.insert(p.name.as_str(), p.id).is_some() {
            return Err(P4Error::schema(format!(
                "{}: duplicate {} name {:?}",
                owner, what, p.name
            )));
        }
        if ids.insert(p.id, p.name.as_str()).is_some() {
            return Err(P4Error::schema(format!("{}: duplicate {} id {}", owner, what, p.id)));
        }
    }
    Ok(())
}

/// Counts message nesting in P4Info text and fails once it passes
/// `MAX_NESTING`, so that the recursive text parser never sees input deep
/// enough to exhaust the stack.
pub(crate) fn check_nesting(text: &str) -> Result<()> {
    let mut depth = 0usize;
    let (mut line, mut column) = (1, 0);
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut comment = false;
    for c in text.chars() {
        if c == '\n' {
            line += 1;
            column = 0;
            comment = false;
            continue;
        }
        column += 1;
        if comment {
            continue;
        }
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '#' => comment = true,
            '{' | '<' => {
                depth += 1;
                if depth > MAX_NESTING {
                    return Err(P4Error::schema(format!(
                        "{}:{}: messages nested more than {} deep",
                        line, column, MAX_NESTING
                    )));
                }
            }
            '}' | '>' => depth = depth.saturating_sub(1),
            _ => (),
        }
    }
    Ok(())
}

/// Name and id lookup for one top-level kind.
#[derive(Debug, Default)]
struct KindIndex {
    by_name: HashMap<String, u32>,
    /// `None` marks an alias shared by more than one object.
    by_alias: HashMap<String, Option<u32>>,
    /// Id to name and position in the kind's vector.
    by_id: HashMap<u32, (String, usize)>,
}

impl KindIndex {
    fn add(&mut self, kind: EntityKind, preamble: &Preamble, position: usize) -> Result<()> {
        if self.by_name.insert(preamble.name.clone(), preamble.id).is_some() {
            return Err(P4Error::schema(format!(
                "duplicate {} name {:?}",
                kind, preamble.name
            )));
        }
        if self
            .by_id
            .insert(preamble.id, (preamble.name.clone(), position))
            .is_some()
        {
            return Err(P4Error::schema(format!("duplicate {} id {}", kind, preamble.id)));
        }
        self.by_alias
            .entry(preamble.alias.clone())
            .and_modify(|id| *id = None)
            .or_insert(Some(preamble.id));
        Ok(())
    }

    fn id(&self, name: &str) -> Option<u32> {
        self.by_name
            .get(name)
            .copied()
            .or_else(|| self.by_alias.get(name).copied().flatten())
    }
}

/// Hands out synthetic member and group ids.  Ids start at 1 and are never
/// reused by the same schema.
#[derive(Debug)]
struct IdAllocator(AtomicU32);

impl IdAllocator {
    fn new() -> Self {
        IdAllocator(AtomicU32::new(1))
    }

    fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// A counter, meter, register or digest: indexed by name and id only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub kind: EntityKind,
    pub preamble: Preamble,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PkgInfo {
    pub name: String,
    pub version: String,
    pub arch: String,
}

impl From<&p4info::PkgInfo> for PkgInfo {
    fn from(p: &p4info::PkgInfo) -> Self {
        PkgInfo {
            name: p.get_name().into(),
            version: p.get_version().into(),
            arch: p.get_arch().into(),
        }
    }
}

/// A match value supplied by a test, in the shape of the field's match
/// kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchValue {
    Exact(Value),
    Lpm(Value, u32),
    Ternary(Value, Value),
    Range(Value, Value),
    Optional(Value),
}

impl MatchValue {
    pub fn exact(value: impl Into<Value>) -> Self {
        MatchValue::Exact(value.into())
    }

    pub fn lpm(value: impl Into<Value>, prefix_len: u32) -> Self {
        MatchValue::Lpm(value.into(), prefix_len)
    }

    pub fn ternary(value: impl Into<Value>, mask: impl Into<Value>) -> Self {
        MatchValue::Ternary(value.into(), mask.into())
    }

    pub fn range(low: impl Into<Value>, high: impl Into<Value>) -> Self {
        MatchValue::Range(low.into(), high.into())
    }

    pub fn optional(value: impl Into<Value>) -> Self {
        MatchValue::Optional(value.into())
    }

    fn shape(&self) -> &'static str {
        match self {
            MatchValue::Exact(_) => "an exact value",
            MatchValue::Lpm(..) => "an LPM value",
            MatchValue::Ternary(..) => "a ternary value",
            MatchValue::Range(..) => "a range",
            MatchValue::Optional(_) => "an optional value",
        }
    }
}

/// The members of a new action profile group, followed by the group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfileGroup {
    pub members: Vec<runtime::ActionProfileMember>,
    pub group: runtime::ActionProfileGroup,
}

impl ProfileGroup {
    /// The entities in the order they must be inserted.
    pub fn into_entities(self) -> Vec<runtime::Entity> {
        self.members
            .into_iter()
            .map(runtime::Entity::from)
            .chain(std::iter::once(self.group.into()))
            .collect()
    }
}

/// A parsed P4Info, indexed for lookup.
///
/// Shared read-only between the harness and the tests (usually in an
/// `Arc`); only the synthetic id counters change after loading.
#[derive(Debug)]
pub struct Schema {
    pub pkg_info: PkgInfo,
    pub tables: Vec<Table>,
    pub actions: Vec<Action>,
    pub action_profiles: Vec<ActionProfile>,
    pub controller_packet_metadata: Vec<ControllerPacketMetadata>,
    pub resources: Vec<Resource>,
    index: HashMap<EntityKind, KindIndex>,
    member_ids: IdAllocator,
    group_ids: IdAllocator,
}

impl Schema {
    /// Parses a P4Info in protobuf text format.
    pub fn from_text(text: &str) -> Result<Schema> {
        check_nesting(text)?;
        let p4info: p4info::P4Info = protobuf::text_format::parse_from_str(text)
            .map_err(|e| P4Error::schema(e.to_string()))?;
        Self::from_proto(&p4info)
    }

    pub fn from_proto(p4i: &p4info::P4Info) -> Result<Schema> {
        let mut index: HashMap<EntityKind, KindIndex> = HashMap::new();
        let mut add = |kind: EntityKind, preamble: &Preamble, position: usize| {
            index.entry(kind).or_default().add(kind, preamble, position)
        };

        let actions: Vec<Action> = p4i
            .get_actions()
            .iter()
            .map(Action::try_from)
            .collect::<Result<_>>()?;
        for (i, a) in actions.iter().enumerate() {
            add(EntityKind::Action, &a.preamble, i)?;
        }
        let actions_by_id: HashMap<u32, Action> = actions
            .iter()
            .map(|a| (a.preamble.id, a.clone()))
            .collect();

        let tables: Vec<Table> = p4i
            .get_tables()
            .iter()
            .map(|x| Table::new_from_proto(x, &actions_by_id))
            .collect::<Result<_>>()?;
        for (i, t) in tables.iter().enumerate() {
            add(EntityKind::Table, &t.preamble, i)?;
        }

        let action_profiles: Vec<ActionProfile> = p4i
            .get_action_profiles()
            .iter()
            .map(ActionProfile::try_from)
            .collect::<Result<_>>()?;
        for (i, ap) in action_profiles.iter().enumerate() {
            add(EntityKind::ActionProfile, &ap.preamble, i)?;
        }

        let controller_packet_metadata: Vec<ControllerPacketMetadata> = p4i
            .get_controller_packet_metadata()
            .iter()
            .map(ControllerPacketMetadata::try_from)
            .collect::<Result<_>>()?;
        for (i, cpm) in controller_packet_metadata.iter().enumerate() {
            add(EntityKind::ControllerPacketMetadata, &cpm.preamble, i)?;
        }

        let resource_preambles = p4i
            .get_counters()
            .iter()
            .map(|x| (EntityKind::Counter, x.has_preamble(), x.get_preamble()))
            .chain(
                p4i.get_direct_counters()
                    .iter()
                    .map(|x| (EntityKind::DirectCounter, x.has_preamble(), x.get_preamble())),
            )
            .chain(
                p4i.get_meters()
                    .iter()
                    .map(|x| (EntityKind::Meter, x.has_preamble(), x.get_preamble())),
            )
            .chain(
                p4i.get_direct_meters()
                    .iter()
                    .map(|x| (EntityKind::DirectMeter, x.has_preamble(), x.get_preamble())),
            )
            .chain(
                p4i.get_registers()
                    .iter()
                    .map(|x| (EntityKind::Register, x.has_preamble(), x.get_preamble())),
            )
            .chain(
                p4i.get_digests()
                    .iter()
                    .map(|x| (EntityKind::Digest, x.has_preamble(), x.get_preamble())),
            );
        let mut resources = Vec::new();
        for (kind, has_preamble, p) in resource_preambles {
            let preamble = preamble_of(&kind.to_string(), has_preamble, p)?;
            add(kind, &preamble, resources.len())?;
            resources.push(Resource { kind, preamble });
        }

        Ok(Schema {
            pkg_info: p4i.get_pkg_info().into(),
            tables,
            actions,
            action_profiles,
            controller_packet_metadata,
            resources,
            index,
            member_ids: IdAllocator::new(),
            group_ids: IdAllocator::new(),
        })
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<Schema> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Self::from_text(&text)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Schema> {
        Self::from_text(&fs::read_to_string(path)?)
    }

    fn kind_index(&self, kind: EntityKind) -> Result<Option<&KindIndex>> {
        if !EntityKind::TOP_LEVEL.contains(&kind) {
            return Err(P4Error::invalid(format!(
                "{} names are scoped; look them up through their parent",
                kind
            )));
        }
        Ok(self.index.get(&kind))
    }

    /// Returns the id of the `kind` object called `name`.  Aliases are
    /// accepted as long as they are unambiguous.
    pub fn resolve(&self, kind: EntityKind, name: &str) -> Result<u32> {
        self.kind_index(kind)?
            .and_then(|index| index.id(name))
            .ok_or_else(|| P4Error::not_found(kind, name))
    }

    /// Returns the name of the `kind` object with id `id`.
    pub fn resolve_name(&self, kind: EntityKind, id: u32) -> Result<&str> {
        self.kind_index(kind)?
            .and_then(|index| index.by_id.get(&id))
            .map(|(name, _)| name.as_str())
            .ok_or_else(|| P4Error::not_found(kind, format!("#{}", id)))
    }

    fn position(&self, kind: EntityKind, id: u32) -> Option<usize> {
        self.index.get(&kind)?.by_id.get(&id).map(|(_, position)| *position)
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        let id = self.resolve(EntityKind::Table, name)?;
        self.table_by_id(id)
    }

    pub fn table_by_id(&self, id: u32) -> Result<&Table> {
        self.position(EntityKind::Table, id)
            .map(|i| &self.tables[i])
            .ok_or_else(|| P4Error::not_found(EntityKind::Table, format!("#{}", id)))
    }

    pub fn action(&self, name: &str) -> Result<&Action> {
        let id = self.resolve(EntityKind::Action, name)?;
        self.action_by_id(id)
    }

    pub fn action_by_id(&self, id: u32) -> Result<&Action> {
        self.position(EntityKind::Action, id)
            .map(|i| &self.actions[i])
            .ok_or_else(|| P4Error::not_found(EntityKind::Action, format!("#{}", id)))
    }

    pub fn action_profile(&self, name: &str) -> Result<&ActionProfile> {
        let id = self.resolve(EntityKind::ActionProfile, name)?;
        self.action_profile_by_id(id)
    }

    pub fn action_profile_by_id(&self, id: u32) -> Result<&ActionProfile> {
        self.position(EntityKind::ActionProfile, id)
            .map(|i| &self.action_profiles[i])
            .ok_or_else(|| P4Error::not_found(EntityKind::ActionProfile, format!("#{}", id)))
    }

    /// Returns the `packet_in` or `packet_out` metadata header.
    pub fn packet_metadata(&self, kind: &str) -> Result<&ControllerPacketMetadata> {
        let id = self.resolve(EntityKind::ControllerPacketMetadata, kind)?;
        self.position(EntityKind::ControllerPacketMetadata, id)
            .map(|i| &self.controller_packet_metadata[i])
            .ok_or_else(|| P4Error::not_found(EntityKind::ControllerPacketMetadata, kind))
    }

    pub fn lookup_match_field(&self, table: &str, field: &str) -> Result<&MatchField> {
        let t = self.table(table)?;
        t.match_fields
            .iter()
            .find(|mf| mf.preamble.name == field)
            .ok_or_else(|| P4Error::not_found_in(EntityKind::MatchField, field, &table_scope(t)))
    }

    pub fn lookup_match_field_by_id(&self, table: &str, id: u32) -> Result<&MatchField> {
        let t = self.table(table)?;
        t.match_fields
            .iter()
            .find(|mf| mf.preamble.id == id)
            .ok_or_else(|| {
                P4Error::not_found_in(EntityKind::MatchField, format!("#{}", id), &table_scope(t))
            })
    }

    pub fn lookup_action_param(&self, action: &str, param: &str) -> Result<&Param> {
        let a = self.action(action)?;
        a.params
            .iter()
            .find(|p| p.preamble.name == param)
            .ok_or_else(|| P4Error::not_found_in(EntityKind::ActionParam, param, &action_scope(a)))
    }

    pub fn lookup_action_param_by_id(&self, action: &str, id: u32) -> Result<&Param> {
        let a = self.action(action)?;
        a.params
            .iter()
            .find(|p| p.preamble.id == id)
            .ok_or_else(|| {
                P4Error::not_found_in(EntityKind::ActionParam, format!("#{}", id), &action_scope(a))
            })
    }

    /// Builds a table entry.
    ///
    /// `matches` names fields of `table`; each value must have the shape of
    /// the field's match kind.  Predicates come out in the table's declared
    /// field order.  Exactly one of `action` and `group_id` must be given,
    /// except for a default entry, which may omit both to reset a table's
    /// default action.
    pub fn build_table_entry(
        &self,
        table: &str,
        matches: &[(&str, MatchValue)],
        action: Option<runtime::Action>,
        group_id: Option<u32>,
        priority: Option<i32>,
        is_default: bool,
    ) -> Result<runtime::TableEntry> {
        let t = self.table(table)?;

        let table_action = match (action, group_id) {
            (Some(_), Some(_)) => {
                return Err(P4Error::invalid(format!(
                    "{}: an entry has either an action or a group, not both",
                    t.preamble.name
                )))
            }
            (Some(action), None) => {
                let ar = t.action_ref(action.action_id).ok_or_else(|| {
                    P4Error::invalid(format!(
                        "{}: table does not reference action {}",
                        t.preamble.name,
                        self.action_name_or_id(action.action_id)
                    ))
                })?;
                if is_default && !ar.may_be_default {
                    return Err(P4Error::invalid(format!(
                        "{}: action {} cannot be the default action",
                        t.preamble.name, ar.action.preamble.name
                    )));
                }
                if !is_default && !ar.may_be_entry {
                    return Err(P4Error::invalid(format!(
                        "{}: action {} can only be the default action",
                        t.preamble.name, ar.action.preamble.name
                    )));
                }
                Some(runtime::TableAction::Action(action))
            }
            (None, Some(group_id)) => {
                if t.implementation_id.is_none() {
                    return Err(P4Error::invalid(format!(
                        "{}: table has no action profile, so entries cannot point to a group",
                        t.preamble.name
                    )));
                }
                Some(runtime::TableAction::GroupId(group_id))
            }
            (None, None) => {
                if !is_default || t.const_default_action.is_none() {
                    return Err(P4Error::invalid(format!(
                        "{}: an action or a group is required",
                        t.preamble.name
                    )));
                }
                None
            }
        };

        if is_default && !matches.is_empty() {
            return Err(P4Error::invalid(format!(
                "{}: a default entry has no match fields",
                t.preamble.name
            )));
        }

        let mut predicates: Vec<(usize, runtime::FieldMatch)> = Vec::with_capacity(matches.len());
        for (name, value) in matches {
            let (position, field) = t
                .match_fields
                .iter()
                .find_position(|mf| mf.preamble.name == *name)
                .ok_or_else(|| {
                    P4Error::not_found_in(EntityKind::MatchField, *name, &table_scope(t))
                })?;
            if predicates.iter().any(|(p, _)| *p == position) {
                return Err(P4Error::invalid(format!(
                    "{}: match field {} given more than once",
                    t.preamble.name, name
                )));
            }
            predicates.push((position, encode_match(field, value)?));
        }

        if !is_default {
            for (position, mf) in t.match_fields.iter().enumerate() {
                if mf.match_type == MatchType::Exact
                    && !predicates.iter().any(|(p, _)| *p == position)
                {
                    return Err(P4Error::invalid(format!(
                        "{}: missing exact match field {}",
                        t.preamble.name, mf.preamble.name
                    )));
                }
            }
        }

        let priority = match priority {
            Some(priority) => priority,
            None if !is_default && t.requires_priority() => {
                return Err(P4Error::invalid(format!(
                    "{}: entries in this table need a priority",
                    t.preamble.name
                )))
            }
            None => 0,
        };

        predicates.sort_by_key(|(position, _)| *position);
        Ok(runtime::TableEntry {
            table_id: t.preamble.id,
            matches: predicates.into_iter().map(|(_, fm)| fm).collect(),
            action: table_action,
            priority,
            is_default_action: is_default,
        })
    }

    /// Builds an action invocation.  Every declared parameter must be
    /// given, and they come out in declared order.
    pub fn build_action(&self, name: &str, params: &[(&str, Value)]) -> Result<runtime::Action> {
        let a = self.action(name)?;
        let mut values: HashMap<&str, &Value> = HashMap::new();
        for (param, value) in params {
            if !a.params.iter().any(|p| p.preamble.name == *param) {
                return Err(P4Error::not_found_in(
                    EntityKind::ActionParam,
                    *param,
                    &action_scope(a),
                ));
            }
            if values.insert(*param, value).is_some() {
                return Err(P4Error::invalid(format!(
                    "{}: parameter {} given more than once",
                    a.preamble.name, param
                )));
            }
        }
        let params = a
            .params
            .iter()
            .map(|p| -> Result<runtime::ActionParam> {
                let value = values.get(p.preamble.name.as_str()).ok_or_else(|| {
                    P4Error::invalid(format!(
                        "{}: missing parameter {}",
                        a.preamble.name, p.preamble.name
                    ))
                })?;
                Ok(runtime::ActionParam {
                    param_id: p.preamble.id,
                    value: wire::encode(value, p.bit_width)?,
                })
            })
            .collect::<Result<_>>()?;
        Ok(runtime::Action {
            action_id: a.preamble.id,
            params,
        })
    }

    fn profile_allows_action(&self, profile: &ActionProfile, action_id: u32) -> bool {
        profile
            .table_ids
            .iter()
            .filter_map(|id| self.table_by_id(*id).ok())
            .any(|t| t.action_ref(action_id).map_or(false, |ar| ar.may_be_entry))
    }

    /// Builds an action profile member.  Without `member_id`, the next
    /// synthetic member id is used.
    pub fn build_action_profile_member(
        &self,
        profile: &str,
        action: runtime::Action,
        member_id: Option<u32>,
    ) -> Result<runtime::ActionProfileMember> {
        let ap = self.action_profile(profile)?;
        if !self.profile_allows_action(ap, action.action_id) {
            return Err(P4Error::invalid(format!(
                "{}: no table implemented by this profile references action {}",
                ap.preamble.name,
                self.action_name_or_id(action.action_id)
            )));
        }
        Ok(runtime::ActionProfileMember {
            action_profile_id: ap.preamble.id,
            member_id: member_id.unwrap_or_else(|| self.member_ids.next()),
            action,
        })
    }

    /// Builds a group with one new member per `(action, weight)` pair.
    /// Member ids (and the group id, when `group_id` is `None`) are
    /// synthetic.
    pub fn build_action_profile_group(
        &self,
        profile: &str,
        group_id: Option<u32>,
        actions: Vec<(runtime::Action, i32)>,
    ) -> Result<ProfileGroup> {
        let ap = self.action_profile(profile)?;
        if !ap.with_selector {
            return Err(P4Error::invalid(format!(
                "{}: groups need an action profile with a selector",
                ap.preamble.name
            )));
        }
        if let Some((_, weight)) = actions.iter().find(|(_, weight)| *weight <= 0) {
            return Err(P4Error::invalid(format!(
                "{}: member weight {} is not positive",
                ap.preamble.name, weight
            )));
        }
        let total_weight: i64 = actions.iter().map(|(_, weight)| *weight as i64).sum();
        if ap.max_group_size > 0 && total_weight > ap.max_group_size as i64 {
            return Err(P4Error::invalid(format!(
                "{}: group weight {} exceeds the maximum group size {}",
                ap.preamble.name, total_weight, ap.max_group_size
            )));
        }

        let mut members = Vec::with_capacity(actions.len());
        let mut group_members = Vec::with_capacity(actions.len());
        for (action, weight) in actions {
            let member = self.build_action_profile_member(profile, action, None)?;
            group_members.push(runtime::GroupMember {
                member_id: member.member_id,
                weight,
            });
            members.push(member);
        }
        Ok(ProfileGroup {
            members,
            group: runtime::ActionProfileGroup {
                action_profile_id: ap.preamble.id,
                group_id: group_id.unwrap_or_else(|| self.group_ids.next()),
                members: group_members,
                max_size: 0,
            },
        })
    }

    fn build_packet_metadata(
        &self,
        kind: &str,
        metadata: &[(&str, Value)],
    ) -> Result<Vec<runtime::PacketMetadata>> {
        let header = self.packet_metadata(kind)?;
        let mut encoded: Vec<(usize, runtime::PacketMetadata)> = Vec::with_capacity(metadata.len());
        for (name, value) in metadata {
            let (position, field) = header
                .metadata
                .iter()
                .find_position(|m| m.preamble.name == *name)
                .ok_or_else(|| P4Error::not_found_in(EntityKind::PacketMetadata, *name, kind))?;
            if encoded.iter().any(|(p, _)| *p == position) {
                return Err(P4Error::invalid(format!(
                    "{}: metadata field {} given more than once",
                    kind, name
                )));
            }
            encoded.push((
                position,
                runtime::PacketMetadata {
                    metadata_id: field.preamble.id,
                    value: wire::encode(value, field.bit_width)?,
                },
            ));
        }
        encoded.sort_by_key(|(position, _)| *position);
        Ok(encoded.into_iter().map(|(_, m)| m).collect())
    }

    pub fn build_packet_out(
        &self,
        payload: impl Into<Vec<u8>>,
        metadata: &[(&str, Value)],
    ) -> Result<runtime::PacketOut> {
        Ok(runtime::PacketOut {
            payload: payload.into(),
            metadata: self.build_packet_metadata("packet_out", metadata)?,
        })
    }

    /// Builds the packet-in a test expects to receive.
    pub fn build_packet_in(
        &self,
        payload: impl Into<Vec<u8>>,
        metadata: &[(&str, Value)],
    ) -> Result<runtime::PacketIn> {
        Ok(runtime::PacketIn {
            payload: payload.into(),
            metadata: self.build_packet_metadata("packet_in", metadata)?,
        })
    }

    fn action_name_or_id(&self, id: u32) -> String {
        match self.resolve_name(EntityKind::Action, id) {
            Ok(name) => name.to_string(),
            Err(_) => format!("#{}", id),
        }
    }

    fn describe_action(&self, action: &runtime::Action) -> String {
        let a = self.action_by_id(action.action_id).ok();
        let params = action.params.iter().map(|p| {
            let name = a
                .and_then(|a| a.params.iter().find(|ap| ap.preamble.id == p.param_id))
                .map_or_else(|| format!("#{}", p.param_id), |ap| ap.preamble.name.clone());
            format!("{}={}", name, Value::Bytes(p.value.clone()))
        });
        format!("{}({})", self.action_name_or_id(action.action_id), params.format(", "))
    }

    /// Renders `entry` with symbolic names, for failure messages.  Ids
    /// unknown to the schema are shown as `#id`.
    pub fn describe_table_entry(&self, entry: &runtime::TableEntry) -> String {
        use runtime::FieldMatchKind::*;

        let table = self.table_by_id(entry.table_id).ok();
        let mut s = match table {
            Some(t) => format!("{} ", t.preamble.name),
            None => format!("#{} ", entry.table_id),
        };
        if entry.is_default_action {
            s.push_str("default");
        } else {
            let predicates = entry.matches.iter().map(|fm| {
                let name = table
                    .and_then(|t| t.match_fields.iter().find(|mf| mf.preamble.id == fm.field_id))
                    .map_or_else(|| format!("#{}", fm.field_id), |mf| mf.preamble.name.clone());
                let b = |v: &Vec<u8>| Value::Bytes(v.clone());
                match &fm.kind {
                    Exact { value } => format!("{}={}", name, b(value)),
                    Lpm { value, prefix_len } => format!("{}={}/{}", name, b(value), prefix_len),
                    Ternary { value, mask } => format!("{}={}&&&{}", name, b(value), b(mask)),
                    Range { low, high } => format!("{}={}..{}", name, b(low), b(high)),
                    Optional { value } => format!("{}={}?", name, b(value)),
                }
            });
            s.push_str(&format!("[{}]", predicates.format(", ")));
        }
        match &entry.action {
            Some(runtime::TableAction::Action(a)) => {
                s.push_str(&format!(" -> {}", self.describe_action(a)))
            }
            Some(runtime::TableAction::MemberId(id)) => s.push_str(&format!(" -> member {}", id)),
            Some(runtime::TableAction::GroupId(id)) => s.push_str(&format!(" -> group {}", id)),
            None => s.push_str(" -> (reset)"),
        }
        if entry.priority != 0 {
            s.push_str(&format!(" priority {}", entry.priority));
        }
        s
    }
}

fn table_scope(t: &Table) -> String {
    format!("table {}", t.preamble.name)
}

fn action_scope(a: &Action) -> String {
    format!("action {}", a.preamble.name)
}

fn encode_match(field: &MatchField, value: &MatchValue) -> Result<runtime::FieldMatch> {
    use runtime::FieldMatchKind;

    let w = field.bit_width;
    let kind = match (&field.match_type, value) {
        (MatchType::Exact, MatchValue::Exact(v)) => FieldMatchKind::Exact {
            value: wire::encode(v, w)?,
        },
        (MatchType::Lpm, MatchValue::Lpm(v, prefix_len)) => {
            if *prefix_len > w {
                return Err(P4Error::invalid(format!(
                    "{}: prefix length {} exceeds the field width {}",
                    field.preamble.name, prefix_len, w
                )));
            }
            FieldMatchKind::Lpm {
                value: wire::encode(v, w)?,
                prefix_len: *prefix_len as i32,
            }
        }
        (MatchType::Ternary, MatchValue::Ternary(v, mask)) => FieldMatchKind::Ternary {
            value: wire::encode(v, w)?,
            mask: wire::encode(mask, w)?,
        },
        (MatchType::Range, MatchValue::Range(low, high)) => FieldMatchKind::Range {
            low: wire::encode(low, w)?,
            high: wire::encode(high, w)?,
        },
        (MatchType::Optional, MatchValue::Optional(v) | MatchValue::Exact(v)) => {
            FieldMatchKind::Optional {
                value: wire::encode(v, w)?,
            }
        }
        (MatchType::Unspecified | MatchType::Other(_), _) => {
            return Err(P4Error::UnsupportedMatchKind {
                field: field.preamble.name.clone(),
                kind: field.match_type.to_string(),
            })
        }
        (kind, value) => {
            return Err(P4Error::invalid(format!(
                "{}: {} given for a {} match field",
                field.preamble.name,
                value.shape(),
                kind
            )))
        }
    };
    Ok(runtime::FieldMatch {
        field_id: field.preamble.id,
        kind,
    })
}

impl Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p4info {} ({} tables, {} actions)",
            if self.pkg_info.arch.is_empty() { "?" } else { self.pkg_info.arch.as_str() },
            self.tables.len(),
            self.actions.len()
        )?;
        for t in &self.tables {
            write!(f, "\n{}", t)?;
        }
        for ap in &self.action_profiles {
            write!(f, "\n{}", ap)?;
        }
        for cpm in &self.controller_packet_metadata {
            write!(f, "\n{}", cpm)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P4INFO: &str = r#"
pkg_info { arch: "v1model" }
tables {
  preamble { id: 1 name: "T" alias: "T" }
  match_fields { id: 1 name: "f" bitwidth: 8 match_type: EXACT }
  action_refs { id: 10 }
  size: 16
}
tables {
  preamble { id: 2 name: "MyIngress.acl" alias: "acl" }
  match_fields { id: 1 name: "hdr.ethernet.etherType" bitwidth: 16 match_type: TERNARY }
  match_fields { id: 2 name: "hdr.ipv4.dstAddr" bitwidth: 32 match_type: LPM }
  match_fields { id: 3 name: "meta.port" bitwidth: 9 match_type: RANGE }
  match_fields { id: 4 name: "meta.flag" bitwidth: 1 match_type: OPTIONAL }
  match_fields { id: 5 name: "hdr.ipv4.$valid$" bitwidth: 1 other_match_type: "valid" }
  action_refs { id: 11 }
  action_refs { id: 10 scope: DEFAULT_ONLY }
  const_default_action_id: 10
}
tables {
  preamble { id: 3 name: "wcmp" }
  match_fields { id: 1 name: "dst" bitwidth: 32 match_type: EXACT }
  action_refs { id: 11 }
  implementation_id: 40
}
actions { preamble { id: 10 name: "A" alias: "A" } }
actions {
  preamble { id: 11 name: "MyIngress.fwd" alias: "fwd" annotations: "@name(\"fwd\")" }
  params { id: 1 name: "port" bitwidth: 9 }
  params { id: 2 name: "mac" bitwidth: 48 }
}
action_profiles {
  preamble { id: 40 name: "selector" }
  table_ids: 3
  with_selector: true
  size: 64
  max_group_size: 4
}
counters { preamble { id: 50 name: "c" } size: 8 }
controller_packet_metadata {
  preamble { id: 60 name: "packet_in" }
  metadata { id: 1 name: "ingress_port" bitwidth: 9 }
  metadata { id: 2 name: "_pad" bitwidth: 7 }
}
controller_packet_metadata {
  preamble { id: 61 name: "packet_out" }
  metadata { id: 1 name: "egress_port" bitwidth: 9 }
}
"#;

    fn schema() -> Schema {
        Schema::from_text(P4INFO).unwrap()
    }

    fn fwd(s: &Schema) -> runtime::Action {
        s.build_action("fwd", &[("port", 1u16.into()), ("mac", "00:00:00:00:00:01".into())])
            .unwrap()
    }

    #[test]
    fn resolve_round_trip() {
        let s = schema();
        for (kind, name) in [
            (EntityKind::Table, "T"),
            (EntityKind::Table, "MyIngress.acl"),
            (EntityKind::Action, "MyIngress.fwd"),
            (EntityKind::ActionProfile, "selector"),
            (EntityKind::Counter, "c"),
            (EntityKind::ControllerPacketMetadata, "packet_out"),
        ] {
            let id = s.resolve(kind, name).unwrap();
            assert_eq!(s.resolve_name(kind, id).unwrap(), name);
        }
        assert_eq!(s.resolve(EntityKind::Table, "acl").unwrap(), 2);
        assert_eq!(s.resolve(EntityKind::Action, "fwd").unwrap(), 11);
        assert!(matches!(
            s.resolve(EntityKind::Table, "nope"),
            Err(P4Error::NotFound { kind: EntityKind::Table, .. })
        ));
        assert!(s.resolve_name(EntityKind::Meter, 50).is_err());
        assert!(matches!(
            s.resolve(EntityKind::MatchField, "f"),
            Err(P4Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn lookups() {
        let s = schema();
        let mf = s.lookup_match_field("acl", "hdr.ipv4.dstAddr").unwrap();
        assert_eq!((mf.preamble.id, mf.bit_width, &mf.match_type), (2, 32, &MatchType::Lpm));
        assert_eq!(s.lookup_match_field_by_id("T", 1).unwrap().preamble.name, "f");
        assert_eq!(s.lookup_action_param("fwd", "mac").unwrap().bit_width, 48);
        assert_eq!(s.lookup_action_param_by_id("fwd", 1).unwrap().preamble.name, "port");
        let err = s.lookup_match_field("T", "g").unwrap_err();
        assert_eq!(
            err.to_string(),
            "no match field named \"g\" in table T (check your P4Info)"
        );
        assert!(s.lookup_action_param("A", "port").is_err());
        assert_eq!(s.packet_metadata("packet_in").unwrap().metadata.len(), 2);
        assert_eq!(
            s.action("fwd").unwrap().preamble.annotations.get("name"),
            Some(&AnnotationValue::Unstructured("\"fwd\"".into()))
        );
    }

    #[test]
    fn exact_entry() {
        let s = schema();
        let a = s.build_action("A", &[]).unwrap();
        let entry = s
            .build_table_entry("T", &[("f", MatchValue::exact(5u8))], Some(a), None, None, false)
            .unwrap();
        assert_eq!(entry.table_id, s.resolve(EntityKind::Table, "T").unwrap());
        match &entry.matches[..] {
            [runtime::FieldMatch {
                field_id: 1,
                kind: runtime::FieldMatchKind::Exact { value },
            }] => assert_eq!(wire::decode(value, 8).unwrap(), 5),
            other => panic!("unexpected matches {:?}", other),
        }
        match &entry.action {
            Some(runtime::TableAction::Action(a)) => {
                assert_eq!(a.action_id, s.resolve(EntityKind::Action, "A").unwrap())
            }
            other => panic!("unexpected action {:?}", other),
        }
        assert_eq!(s.describe_table_entry(&entry), "T [f=0x05] -> A()");
    }

    #[test]
    fn match_kinds_in_declared_order() {
        let s = schema();
        let entry = s
            .build_table_entry(
                "acl",
                &[
                    ("meta.flag", MatchValue::exact(1u8)),
                    ("meta.port", MatchValue::range(1u16, 8u16)),
                    ("hdr.ipv4.dstAddr", MatchValue::lpm("10.0.0.0", 8)),
                    ("hdr.ethernet.etherType", MatchValue::ternary(0x0800u16, 0xffffu16)),
                ],
                Some(fwd(&s)),
                None,
                Some(10),
                false,
            )
            .unwrap();
        let ids: Vec<u32> = entry.matches.iter().map(|m| m.field_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(
            entry.matches[1].kind,
            runtime::FieldMatchKind::Lpm { value: vec![10, 0, 0, 0], prefix_len: 8 }
        );
        assert_eq!(
            entry.matches[2].kind,
            runtime::FieldMatchKind::Range { low: vec![0, 1], high: vec![0, 8] }
        );
        assert_eq!(entry.matches[3].kind, runtime::FieldMatchKind::Optional { value: vec![1] });
        assert_eq!(entry.priority, 10);
    }

    #[test]
    fn entry_validation() {
        let s = schema();
        let a = || s.build_action("A", &[]).unwrap();
        let invalid =
            |r: Result<runtime::TableEntry>| matches!(r, Err(P4Error::InvalidArgument(_)));

        // Missing exact field.
        assert!(invalid(s.build_table_entry("T", &[], Some(a()), None, None, false)));
        // Duplicate field.
        assert!(invalid(s.build_table_entry(
            "T",
            &[("f", MatchValue::exact(1u8)), ("f", MatchValue::exact(2u8))],
            Some(a()),
            None,
            None,
            false
        )));
        // Wrong shape.
        assert!(invalid(s.build_table_entry(
            "T",
            &[("f", MatchValue::lpm(1u8, 8))],
            Some(a()),
            None,
            None,
            false
        )));
        // Action not referenced by the table.
        assert!(invalid(s.build_table_entry(
            "T",
            &[("f", MatchValue::exact(1u8))],
            Some(fwd(&s)),
            None,
            None,
            false
        )));
        // Default-only action used for an entry.
        assert!(invalid(s.build_table_entry("acl", &[], Some(a()), None, Some(1), false)));
        // Both an action and a group.
        assert!(invalid(s.build_table_entry(
            "wcmp",
            &[("dst", MatchValue::exact(1u32))],
            Some(fwd(&s)),
            Some(1),
            None,
            false
        )));
        // Neither, and not a default entry.
        assert!(invalid(s.build_table_entry(
            "T",
            &[("f", MatchValue::exact(1u8))],
            None,
            None,
            None,
            false
        )));
        // Ternary table without a priority.
        assert!(invalid(s.build_table_entry(
            "acl",
            &[("meta.flag", MatchValue::optional(1u8))],
            Some(fwd(&s)),
            None,
            None,
            false
        )));
        // Prefix longer than the field.
        assert!(invalid(s.build_table_entry(
            "acl",
            &[("hdr.ipv4.dstAddr", MatchValue::lpm("10.0.0.0", 33))],
            Some(fwd(&s)),
            None,
            Some(1),
            false
        )));

        assert!(matches!(
            s.build_table_entry(
                "T",
                &[("f", MatchValue::exact(256u16))],
                Some(a()),
                None,
                None,
                false
            ),
            Err(P4Error::ValueOverflow { bit_width: 8, .. })
        ));
        assert!(matches!(
            s.build_table_entry(
                "T",
                &[("g", MatchValue::exact(1u8))],
                Some(a()),
                None,
                None,
                false
            ),
            Err(P4Error::NotFound { kind: EntityKind::MatchField, .. })
        ));
        assert!(matches!(
            s.build_table_entry(
                "acl",
                &[("hdr.ipv4.$valid$", MatchValue::exact(1u8))],
                Some(fwd(&s)),
                None,
                Some(1),
                false
            ),
            Err(P4Error::UnsupportedMatchKind { .. })
        ));
    }

    #[test]
    fn default_entries() {
        let s = schema();
        let reset = s.build_table_entry("acl", &[], None, None, None, true).unwrap();
        assert!(reset.is_default_action && reset.action.is_none() && reset.matches.is_empty());
        assert_eq!(s.describe_table_entry(&reset), "MyIngress.acl default -> (reset)");

        let a = s.build_action("A", &[]).unwrap();
        assert!(s.build_table_entry("acl", &[], Some(a), None, None, true).is_ok());
        // T has no const default action to fall back to.
        assert!(s.build_table_entry("T", &[], None, None, None, true).is_err());
    }

    #[test]
    fn actions() {
        let s = schema();
        let a = fwd(&s);
        assert_eq!(
            a.params,
            vec![
                runtime::ActionParam { param_id: 1, value: vec![0, 1] },
                runtime::ActionParam { param_id: 2, value: vec![0, 0, 0, 0, 0, 1] },
            ]
        );
        assert!(matches!(
            s.build_action("fwd", &[("port", 1u16.into())]),
            Err(P4Error::InvalidArgument(_))
        ));
        assert!(matches!(
            s.build_action("fwd", &[("prot", 1u16.into())]),
            Err(P4Error::NotFound { kind: EntityKind::ActionParam, .. })
        ));
        assert!(matches!(s.build_action("B", &[]), Err(P4Error::NotFound { .. })));
    }

    #[test]
    fn profile_groups() {
        let s = schema();
        let g1 = s
            .build_action_profile_group("selector", None, vec![(fwd(&s), 1), (fwd(&s), 2)])
            .unwrap();
        let ids: Vec<u32> = g1.members.iter().map(|m| m.member_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(g1.group.group_id, 1);
        assert_eq!(g1.group.members[1], runtime::GroupMember { member_id: 2, weight: 2 });

        let g2 = s.build_action_profile_group("selector", Some(7), vec![(fwd(&s), 1)]).unwrap();
        assert_eq!(g2.members[0].member_id, 3);
        assert_eq!(g2.group.group_id, 7);
        let entities = g2.into_entities();
        assert!(matches!(entities.last(), Some(runtime::Entity::ActionProfileGroup(_))));

        assert!(s
            .build_action_profile_group("selector", None, vec![(fwd(&s), 3), (fwd(&s), 2)])
            .is_err());
        let a = s.build_action("A", &[]).unwrap();
        assert!(s.build_action_profile_member("selector", a, None).is_err());
    }

    #[test]
    fn packet_metadata() {
        let s = schema();
        let out = s.build_packet_out(vec![1, 2, 3], &[("egress_port", 3u16.into())]).unwrap();
        assert_eq!(
            out.metadata,
            vec![runtime::PacketMetadata { metadata_id: 1, value: vec![0, 3] }]
        );
        let pin = s
            .build_packet_in(vec![], &[("_pad", 0u8.into()), ("ingress_port", 2u16.into())])
            .unwrap();
        let ids: Vec<u32> = pin.metadata.iter().map(|m| m.metadata_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(matches!(
            s.build_packet_out(vec![], &[("ingress_port", 1u16.into())]),
            Err(P4Error::NotFound { kind: EntityKind::PacketMetadata, .. })
        ));
    }

    #[test]
    fn malformed_p4info() {
        let err = |text: &str| match Schema::from_text(text) {
            Err(P4Error::SchemaParse(message)) => message,
            other => panic!("unexpected {:?}", other),
        };
        let message = err(concat!(
            "actions { preamble { id: 1 name: \"a\" } }\n",
            "actions { preamble { id: 1 name: \"b\" } }"
        ));
        assert_eq!(message, "duplicate action id 1");
        let message = err("tables {\n preamble { id: 1 name: \"t\" }\n action_refs { id: 9 }\n}");
        assert_eq!(message, "table t: reference to unknown action 9");
        let message = err("tables { match_fields { id: 1 name: \"f\" bitwidth: 8 } }");
        assert_eq!(message, "table without a preamble");
        let message =
            err("actions { preamble { id: 1 name: \"a\" } params { id: 1 name: \"p\" } }");
        assert_eq!(message, "\"p\": unsupported bit width 0");
        err("tables {");
        err("no_such_field: 1");
    }

    #[test]
    fn deep_nesting_is_a_parse_error() {
        let message = match Schema::from_text(&"a {".repeat(200_000)) {
            Err(P4Error::SchemaParse(message)) => message,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(message, "1:195: messages nested more than 64 deep");

        // Braces inside strings do not count.
        let text = format!(
            "pkg_info {{ name: \"{}\" arch: \"v1model\" }}",
            "{<".repeat(100)
        );
        assert_eq!(Schema::from_text(&text).unwrap().pkg_info.arch, "v1model");
    }

    #[test]
    fn display() {
        let s = schema();
        let t = s.table("T").unwrap().to_string();
        assert_eq!(t, "table T:\tfield f: bit<8> exact-match\taction A()\tsize: 16");
        let acl = s.table("acl").unwrap().to_string();
        assert!(acl.contains("default-only action A()"), "{}", acl);
        assert!(acl.contains("const default action action A()"), "{}", acl);
        assert!(s.to_string().starts_with("p4info v1model (3 tables, 2 actions)"));
    }
}
