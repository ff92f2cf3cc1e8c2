//! Executable serialization round-trips: emit, link, serialize, reload,
//! and re-execute with identical observable output.

use pretty_assertions::assert_eq;
use venom::{
    CollectSink, CompileOpts, Executable, analysis::analyzer::NoModules, compile, execute,
};

fn compile_src(src: &str) -> Executable {
    compile(src, "main", &CompileOpts::default(), &NoModules)
        .expect("compiles")
        .expect("full compile requested")
}

fn run_exec(exec: &Executable) -> String {
    let mut sink = CollectSink::new();
    execute(exec, &mut sink).expect("executes");
    sink.into_string()
}

#[test]
fn test_roundtrip_preserves_observable_output() {
    let src = "\
class A
  def m() :: int = return 1; end
end
class B <: A
  def m() :: int = return 2; end
end
a = B()
l = [1, 2, 3]
s = 0
for v in l
  s = s + v
end
print(a.m() + s)
";
    let exec = compile_src(src);
    let first = run_exec(&exec);

    let bytes = exec.to_bytes().expect("serializes");
    let reloaded = Executable::from_bytes(&bytes).expect("deserializes");
    let second = run_exec(&reloaded);

    assert_eq!(first, second);
    assert_eq!(first, "8\n");
}

#[test]
fn test_same_executable_runs_twice() {
    let exec = compile_src("print(6 * 7)");
    assert_eq!(run_exec(&exec), "42\n");
    assert_eq!(run_exec(&exec), "42\n");
}

#[test]
fn test_descriptor_bitmaps_count_reference_parameters() {
    // popcount(arg_ref_bitmap) equals the number of reference-typed
    // parameters, counting the receiver for methods
    let src = "\
class A
  def m(s::string, n::int) :: int = return n; end
end
a = A()
print(a.m(\"x\", 5))
";
    let exec = compile_src(src);
    let method = exec
        .func_descs
        .iter()
        .find(|d| d.num_args == 3)
        .expect("method descriptor present");
    assert_eq!(method.arg_ref_bitmap.count_ones(), 2);
}
