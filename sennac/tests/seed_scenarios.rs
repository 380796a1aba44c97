//! End-to-end pipeline tests: each scenario compiles to C in-process and
//! the emitted translation unit is checked for the structural pieces the
//! arena discipline requires (arena threading, promotion, closure cells,
//! pending/sync plumbing).

use compiler::arena::use_arena;
use compiler::resolve::Resolver;

fn compile_to_c(source: &str) -> String {
    use_arena(|arena| {
        let module = parser::parse_module(arena, source).expect("parse");
        let mut resolver = Resolver::new(arena);
        resolver
            .resolve(&module, std::path::Path::new("."), &|arena, text| {
                parser::parse_module(arena, text)
            })
            .expect("resolve");
        compiler::compile(arena, &module).expect("compile").source
    })
}

fn compile_error(source: &str) -> compiler::error::Error {
    use_arena(|arena| {
        let module = parser::parse_module(arena, source).expect("parse");
        compiler::compile(arena, &module).expect_err("expected a compile error")
    })
}

#[test]
fn empty_module_produces_a_valid_main() {
    let c = compile_to_c("");
    assert!(c.contains("int main(void)"));
    assert!(c.contains("sn_arena_create(NULL)"));
    assert!(c.contains("sn_arena_destroy(__local_arena__)"));
    assert!(c.contains("return 0;"));
}

#[test]
fn closure_mutation_survives_calls() {
    let c = compile_to_c(
        r"
counter(): fn(): int {
    var n: int = 0
    return (): int => {
        n = n + 1
        return n
    }
}

main() {
    var tick = counter()
    println(tick())
    println(tick())
    println(tick())
}
",
    );
    // The captured primitive becomes a heap cell in the caller's arena.
    assert!(c.contains("sn_arena_alloc(__caller_arena__, sizeof(long long))"));
    // The lambda reads and writes through the environment pointer.
    assert!(c.contains("(*__env__->n)"));
    // The closure itself is constructed in the caller's arena.
    assert!(c.contains("__make_closure_0__(__caller_arena__"));
    // Closure invocation goes through the stored function pointer.
    assert!(c.contains("SnClosureHdr"));
}

#[test]
fn tail_recursive_factorial_becomes_a_loop() {
    let c = compile_to_c(
        r"
factAcc(n: long, acc: long): long {
    if n <= 1 {
        return acc
    }
    return factAcc(n - 1, n * acc)
}

main() {
    println(factAcc(20, 1))
}
",
    );
    assert!(c.contains("while (1) { /* tail call loop */"));
    assert!(c.contains("__tail_arg_0__"));
    assert!(c.contains("__tail_arg_1__"));
    assert!(c.contains("continue;"));
    // The recursive frame never re-enters through a call in tail position.
    assert!(c.contains("factAcc_return:"));
}

#[test]
fn array_promotes_across_the_function_boundary() {
    let c = compile_to_c(
        r"
makeVec(n: int): int[] {
    var v: int[] = []
    for i in 0..n {
        v.push(i)
    }
    return v
}

main() {
    println(makeVec(5))
}
",
    );
    // push writes the possibly-new handle back.
    assert!(c.contains("v = sn_array_push_long(__local_arena__, v, i)"));
    // The return value is promoted into the caller's arena.
    assert!(c.contains("_return_value = sn_array_clone_long(__caller_arena__, _return_value);"));
    // Printing renders through the array stringifier.
    assert!(c.contains("sn_array_to_string_long"));
}

#[test]
fn as_val_parameter_is_cloned_into_the_callee() {
    let c = compile_to_c(
        r"
grow(a: int[] as val): long {
    a.push(99)
    return a.len()
}

main() {
    var xs: int[] = [1, 2, 3]
    println(grow(xs))
    println(xs.len())
}
",
    );
    assert!(c.contains("a = sn_array_clone_long(__local_arena__, a);"));
    assert!(c.contains("sn_array_create_long"));
}

#[test]
fn spawn_then_sync_plumbs_the_result() {
    let c = compile_to_c(
        r"
slow(): int {
    return 42
}

main() {
    var r = spawn slow()
    sync r
    println(r)
}
",
    );
    assert!(c.contains("SnHandle *__r_pending__ = sn_thread_spawn"));
    assert!(c.contains("__spawn_fn_0__"));
    assert!(c.contains("r = (long long)sn_thread_sync_long(__r_pending__);"));
    // The thunk runs the call under its own root arena.
    assert!(c.contains("SnArena *__spawn_arena__ = sn_arena_create(NULL);"));
}

#[test]
fn any_round_trip_boxes_and_unboxes() {
    let c = compile_to_c(
        r"
main() {
    var a: any = 7
    var b: long = a as long
    println(b)
}
",
    );
    assert!(c.contains("sn_box_long"));
    assert!(c.contains("sn_unbox_long"));
}

#[test]
fn shared_functions_alias_the_caller_arena() {
    let c = compile_to_c(
        r"
shared fill(v: int[], x: int): int[] {
    v.push(x)
    return v
}

main() {
    var v: int[] = []
    v = fill(v, 1)
    println(v)
}
",
    );
    assert!(c.contains("SnArena *__local_arena__ = __caller_arena__;"));
    // Shared functions neither promote nor destroy.
    let fill_body = c.split("fill_return:").nth(1).expect("fill postamble");
    let epilogue = &fill_body[..fill_body.find('}').unwrap_or(fill_body.len())];
    assert!(!epilogue.contains("sn_arena_destroy(__local_arena__)"));
}

#[test]
fn double_sync_is_rejected() {
    let err = compile_error(
        r"
slow(): int {
    return 1
}

main() {
    var r = spawn slow()
    sync r
    sync r
}
",
    );
    assert!(err.to_string().contains("already been synchronized"));
}

#[test]
fn frozen_spawn_argument_cannot_be_mutated() {
    let err = compile_error(
        r"
slow(x: int): int {
    return x
}

main() {
    var n: int = 1
    var r = spawn slow(n)
    n = 2
    sync r
}
",
    );
    assert!(err.to_string().contains("frozen"));
}

#[test]
fn pending_binding_cannot_be_read_before_sync() {
    let err = compile_error(
        r"
slow(): int {
    return 1
}

main() {
    var r = spawn slow()
    println(r)
}
",
    );
    assert!(err.to_string().contains("pending"));
}

#[test]
fn interpolation_concatenates_string_parts() {
    let c = compile_to_c(
        r#"
main() {
    var x: int = 3
    println("x is {x}!")
}
"#,
    );
    assert!(c.contains("sn_string_concat"));
    assert!(c.contains("sn_to_string_long"));
}

#[test]
fn deferred_globals_replay_under_the_main_arena() {
    let c = compile_to_c(
        r#"
var greeting: str = "hi"

main() {
    println(greeting)
}
"#,
    );
    // File scope holds only the null slot; main replays the initializer.
    assert!(c.contains("SnHandle *greeting = NULL;"));
    assert!(c.contains("__main_arena__ = __local_arena__;"));
    assert!(c.contains("greeting = sn_string_from(__main_arena__, \"hi\")"));
}

#[test]
fn private_blocks_bracket_a_scratch_arena() {
    let c = compile_to_c(
        r"
main() {
    private {
        var scratch: int = 1
        println(scratch)
    }
}
",
    );
    assert!(c.contains("__private_arena_"));
    let create = c.find("sn_arena_create(__local_arena__)").expect("private create");
    let destroy = c[create..].find("sn_arena_destroy(__private_arena_").expect("private destroy");
    assert!(destroy > 0);
}

#[test]
fn lock_statement_brackets_the_body() {
    let c = compile_to_c(
        r"
var counter: int = 0

main() {
    lock (counter) => {
        counter = counter + 1
    }
    println(counter)
}
",
    );
    assert!(c.contains("sn_sync_lock((void *)&(counter));"));
    assert!(c.contains("sn_sync_unlock((void *)&(counter));"));
}
