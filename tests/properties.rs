use std::collections::BTreeSet;

use arbtest::arbtest;
use assert2::{assert, check, let_assert};
use spindle::{
    CompileError, Compiler, OpCode, Options, Program, ResolveError, Schema, TypeArena, TypeId,
};

fn unoptimized() -> Compiler {
    Compiler::new(Options::default().with_optimize(false))
}

fn compile_named(source: &str, root: &str, options: Options) -> Result<(Schema, Program), CompileError> {
    let schema = Schema::parse(source).unwrap();
    let ty = schema.lookup(root).unwrap();
    let program = Compiler::new(options).compile(schema.types(), ty)?;
    Ok((schema, program))
}

fn scalar(types: &mut TypeArena, pick: u8) -> TypeId {
    match pick % 6 {
        0 => types.bool(),
        1 => types.i8(),
        2 => types.i16(),
        3 => types.i32(),
        4 => types.i64(),
        _ => types.double(),
    }
}

fn is_stop(program: &Program, pc: usize) -> bool {
    program[pc].op() == OpCode::Byte && program[pc].iv() == 0
}

#[test]
fn struct_has_a_single_trailing_stop() {
    arbtest(|u| {
        let mut types = TypeArena::new();
        let count = u.int_in_range(0..=24)?;
        let mut fields = vec![];
        for id in 1..=count {
            let ty = scalar(&mut types, u.arbitrary()?);
            fields.push((id, format!("f{id}"), ty));
        }
        let st = types.declare_struct("Flat");
        types.define_struct(st, fields).unwrap();

        let program = unoptimized().compile(&types, st).unwrap();
        let stops: Vec<_> = (0..program.len()).filter(|&pc| is_stop(&program, pc)).collect();
        check!(stops == [program.len() - 1]);
        if count == 0 {
            check!(program.len() == 1);
        }
        Ok(())
    });
}

#[test]
fn nested_struct_stops_close_their_own_span() {
    let (_, program) = compile_named(
        "struct Inner { 1: i32 a }  struct Outer { 1: Inner inner, 2: i8 tail }",
        "Outer",
        Options::default().with_optimize(false),
    )
    .unwrap();

    let stops: Vec<_> = (0..program.len()).filter(|&pc| is_stop(&program, pc)).collect();
    // Inner's STOP comes right after its only field, Outer's at the very end
    check!(stops == [8, program.len() - 1]);
}

/// Finds every `is_end; if_true` pair and checks it against its back edge.
fn check_loops(program: &Program) -> usize {
    let mut loops = 0;
    for pc in 0..program.len() {
        let op = program[pc].op();
        if op != OpCode::MapIsEnd && op != OpCode::ListIsEnd {
            continue;
        }
        let exit = program[pc + 1];
        assert!(exit.op() == OpCode::IfTrue);
        let back = exit.target() - 1;
        check!(program[back].op() == OpCode::Goto);
        check!(program[back].target() == pc);
        loops += 1;
    }
    loops
}

#[test]
fn container_loops_are_well_formed() {
    let source = "
        struct Item { 1: string name, 2: optional i64 weight }
        struct Bag {
            1: map<string, list<Item>> items
            2: set<i16> tags
            3: list<map<i32, set<binary>>> deep
        }
    ";
    for optimize in [false, true] {
        let (_, program) = compile_named(source, "Bag", Options::default().with_optimize(optimize)).unwrap();
        check!(check_loops(&program) == 6);
    }
}

#[test]
fn recursion_is_deferred() {
    let source = "
        struct Node { 1: i64 value, 2: optional Node next, 3: map<string, Node> named }
    ";
    let (schema, program) = compile_named(source, "Node", Options::default()).unwrap();
    let node = schema.lookup("Node").unwrap();

    let defers: Vec<_> = program.iter().filter(|i| i.op() == OpCode::Defer).collect();
    check!(defers.len() == 2);
    check!(defers.iter().all(|i| i.vt() == node));
}

#[test]
fn mutual_recursion_defers_at_the_cycle() {
    let source = "
        struct Expr { 1: optional Call call }
        struct Call { 1: string name, 2: list<Expr> args }
    ";
    let (schema, program) = compile_named(source, "Expr", Options::default()).unwrap();
    let expr = schema.lookup("Expr").unwrap();

    let defers: Vec<_> = program.iter().filter(|i| i.op() == OpCode::Defer).map(|i| i.vt()).collect();
    check!(defers == [expr]);
}

#[test]
fn siblings_are_inlined() {
    let source = "
        struct Point { 1: i32 x, 2: i32 y }
        struct Line { 1: Point from, 2: Point to, 3: list<Point> via }
    ";
    let (_, program) = compile_named(source, "Line", Options::default()).unwrap();
    check!(program.iter().all(|i| i.op() != OpCode::Defer));
}

fn chain(levels: usize) -> String {
    let mut source = String::new();
    for level in 0..levels - 1 {
        source.push_str(&format!("struct S{level} {{ 1: S{} inner }}\n", level + 1));
    }
    source.push_str(&format!("struct S{} {{ 1: i32 leaf }}\n", levels - 1));
    source
}

#[test]
fn nesting_budget() {
    let options = Options::default().with_max_depth(4);
    check!(compile_named(&chain(4), "S0", options).is_ok());

    let_assert!(Err(err) = compile_named(&chain(5), "S0", options));
    check!(err == CompileError::NestingTooDeep { depth: 4, limit: 4 });
}

#[test]
fn containers_count_toward_nesting() {
    let options = Options::default().with_max_depth(2);
    let (_, program) = compile_named("struct A { 1: list<i32> xs }", "A", options).unwrap();
    check!(!program.is_empty());

    let result = compile_named("struct A { 1: list<list<i32>> xs }", "A", options);
    check!(let Err(CompileError::NestingTooDeep { depth: 2, .. }) = result);
}

#[test]
fn pointer_chains_count_toward_nesting() {
    let mut types = TypeArena::new();
    let mut ty = types.i32();
    for _ in 0..10 {
        ty = types.pointer(ty);
    }
    let result = Compiler::new(Options::default().with_max_depth(2)).compile(&types, ty);
    check!(result == Err(CompileError::NestingTooDeep { depth: 2, limit: 2 }));

    let (_, program) = compile_named("typedef **i32 Twice", "Twice", Options::default().with_max_depth(2)).unwrap();
    check!(program.iter().filter(|i| i.op() == OpCode::Deref).count() == 2);
}

#[test]
fn pointer_skips_exactly_the_referent() {
    arbtest(|u| {
        let mut types = TypeArena::new();
        let inner = scalar(&mut types, u.arbitrary()?);
        let ptr = types.pointer(inner);

        let direct = unoptimized().compile(&types, inner).unwrap();
        let guarded = unoptimized().compile(&types, ptr).unwrap();

        let branches: Vec<_> = guarded.iter().filter(|i| i.op().is_branch()).collect();
        check!(branches.len() == 1);
        check!(guarded[0].op() == OpCode::Deref);
        check!(guarded[0].target() == guarded.len());
        check!(guarded.as_slice()[1..] == *direct.as_slice());
        Ok(())
    });
}

#[test]
fn labels_cover_branch_targets_only() {
    let source = "
        struct Leaf { 1: optional string note }
        struct Tree {
            1: list<Tree> children
            2: map<i64, *Leaf> leaves
            3: optional Tree parent
            4: set<string> tags
        }
    ";
    for optimize in [false, true] {
        let (schema, program) = compile_named(source, "Tree", Options::default().with_optimize(optimize)).unwrap();
        let text = program.disassemble(schema.types());

        let targets: BTreeSet<_> = program
            .iter()
            .filter(|i| i.op().is_branch())
            .map(|i| i.target())
            .collect();
        let labels: BTreeSet<_> = text
            .lines()
            .filter_map(|line| line.strip_prefix("L_")?.strip_suffix(':')?.parse::<usize>().ok())
            .collect();
        check!(labels == targets);
        check!(text.ends_with("\tend"));

        // a label line is always followed by the instruction it names, or by `end`
        let lines: Vec<_> = text.lines().collect();
        let mut pc = 0;
        for line in &lines {
            if let Some(label) = line.strip_prefix("L_") {
                check!(label == format!("{pc}:"));
            } else if *line != "\tend" {
                pc += 1;
            }
        }
        check!(pc == program.len());
    }
}

#[test]
fn capacity_limit() {
    let source = "struct A { 1: i32 a, 2: i32 b, 3: i32 c }";
    let (_, program) = compile_named(source, "A", Options::default().with_optimize(false)).unwrap();
    let exact = program.len() as u64;

    check!(compile_named(source, "A", Options::default().with_optimize(false).with_max_program_len(exact)).is_ok());
    let result = compile_named(source, "A", Options::default().with_max_program_len(exact - 1));
    check!(result.err() == Some(CompileError::ProgramTooLong { limit: exact - 1 }));
}

#[test]
fn resolution_errors_pass_through() {
    let mut types = TypeArena::new();
    let ghost = types.declare_struct("Ghost");
    let list = types.list(ghost);
    let_assert!(Err(CompileError::Resolve(err)) = Compiler::default().compile(&types, list));
    check!(err == ResolveError::Undefined("Ghost".into()));

    let looped = types.declare_struct("Looped");
    types.define_struct(looped, [(1, "again", looped)]).unwrap();
    let_assert!(Err(CompileError::Resolve(err)) = Compiler::default().compile(&types, looped));
    check!(err == ResolveError::InfiniteSize("Looped".into()));

    let_assert!(Err(CompileError::Resolve(err)) = Compiler::default().compile(&types, TypeId::from_raw(1 << 40)));
    check!(err == ResolveError::UnknownHandle(TypeId::from_raw(1 << 40)));
}

#[test]
fn optimizing_keeps_what_is_written() {
    let source = "
        struct Header { 1: i16 version, 2: bool flag }
        struct Empty {}
        struct Packet {
            1: Header header
            2: Empty nothing
            3: i8 small
            4: double score
            5: optional list<i64> samples
            6: binary body
        }
    ";
    let (_, plain) = compile_named(source, "Packet", Options::default().with_optimize(false)).unwrap();
    let (_, optimized) = compile_named(source, "Packet", Options::default()).unwrap();
    check!(optimized.len() < plain.len());

    // everything but reservations and empty seeks survives in order
    let writes = |p: &Program| -> Vec<(OpCode, i64)> {
        p.iter()
            .filter(|i| i.op() != OpCode::Size && !(i.op() == OpCode::Seek && i.iv() == 0))
            .filter(|i| !i.op().is_branch())
            .map(|i| (i.op(), i.iv()))
            .collect()
    };
    check!(writes(&plain) == writes(&optimized));

    let reserved = |p: &Program| -> i64 { p.iter().filter(|i| i.op() == OpCode::Size).map(|i| i.iv()).sum() };
    check!(reserved(&plain) == reserved(&optimized));
}

#[test]
fn top_level_compile() {
    let_assert!(Ok((schema, program)) = spindle::compile("typedef list<string> Names", "Names"));
    check!(program.disassemble(schema.types()).starts_with("\tsize              5\n\tbyte              0x0b"));

    check!(let Err(spindle::Error::UnknownRoot(_)) = spindle::compile("struct A {}", "B"));
    check!(let Err(spindle::Error::Schema(_)) = spindle::compile("struct {", "A"));
}
