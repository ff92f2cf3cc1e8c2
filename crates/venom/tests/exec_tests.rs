//! End-to-end tests: source text in, printed output out.

use pretty_assertions::assert_eq;
use venom::run_source;

fn run(src: &str) -> String {
    match run_source(src) {
        Ok(out) => out,
        Err(err) => panic!("program failed: {err}\nsource:\n{src}"),
    }
}

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(run("print(1 + 2 * 3)"), "7\n");
}

#[test]
fn test_conditional_branches() {
    let src = "x = 5\nif x < 10 then print(\"lo\") else print(\"hi\") end";
    assert_eq!(run(src), "lo\n");
    let src = "x = 50\nif x < 10 then print(\"lo\") else print(\"hi\") end";
    assert_eq!(run(src), "hi\n");
}

#[test]
fn test_string_concatenation() {
    assert_eq!(run("print(\"a\" + \"b\" + \"c\")"), "abc\n");
}

#[test]
fn test_method_dispatch_uses_dynamic_type() {
    let src = "\
class A
  def m() :: int = return 1; end
end
class B <: A
  def m() :: int = return 2; end
end
a = B()
print(a.m())
";
    assert_eq!(run(src), "2\n");
}

#[test]
fn test_inherited_method_through_parent_slot() {
    let src = "\
class A
  def m() :: int = return 1; end
  def n() :: int = return 10; end
end
class B <: A
  def m() :: int = return 2; end
end
b = B()
print(b.m() + b.n())
";
    assert_eq!(run(src), "12\n");
}

#[test]
fn test_parameterized_function_monomorphization() {
    let src = "\
def id{T}(x::T) :: T = return x; end
print(id{int}(41) + 1)
";
    assert_eq!(run(src), "42\n");
}

#[test]
fn test_monomorphization_two_tuples() {
    let src = "\
def id{T}(x::T) :: T = return x; end
print(id{int}(7))
print(id{string}(\"seven\"))
";
    assert_eq!(run(src), "7\nseven\n");
}

#[test]
fn test_closure_lifting_promotes_captured_variable() {
    let src = "\
def outer() :: int =
  x = 10
  def inner() :: int =
    x = x + 1
    return x
  end
  inner()
  return x
end
print(outer())
";
    assert_eq!(run(src), "11\n");
}

#[test]
fn test_lifted_function_called_twice() {
    let src = "\
def outer() :: int =
  x = 0
  def bump() :: int =
    x = x + 1
    return x
  end
  bump()
  bump()
  return x
end
print(outer())
";
    assert_eq!(run(src), "2\n");
}

#[test]
fn test_captured_parameter_is_ref_promoted() {
    let src = "\
def outer(seed::int) :: int =
  def bump() :: int =
    seed = seed + 5
    return seed
  end
  bump()
  return seed
end
print(outer(37))
";
    assert_eq!(run(src), "42\n");
}

#[test]
fn test_class_attributes_and_constructor() {
    let src = "\
class Point
  attr x :: int
  attr y :: int
  def ctor(a::int, b::int) =
    x = a
    y = b
  end
  def total() :: int = return x + y; end
end
p = Point(1, 2)
print(p.total())
";
    assert_eq!(run(src), "3\n");
}

#[test]
fn test_attribute_initializer_runs_in_ctor() {
    let src = "\
class Counter
  attr n :: int = 40
  def bump() :: int =
    n = n + 1
    return n
  end
end
c = Counter()
c.bump()
print(c.bump())
";
    assert_eq!(run(src), "42\n");
}

#[test]
fn test_super_constructor_and_inherited_field() {
    let src = "\
class A
  attr base :: int = 7
end
class B <: A
  def get() :: int = return base; end
end
b = B()
print(b.get())
";
    assert_eq!(run(src), "7\n");
}

#[test]
fn test_super_method_invocation_is_direct() {
    let src = "\
class A
  def m() :: int = return 1; end
end
class B <: A
  def m() :: int = return super.m() + 10; end
end
b = B()
print(b.m())
";
    assert_eq!(run(src), "11\n");
}

#[test]
fn test_list_literal_and_for_loop() {
    let src = "\
l = [1, 2, 3]
s = 0
for v in l
  s = s + v
end
print(s)
";
    assert_eq!(run(src), "6\n");
}

#[test]
fn test_list_methods() {
    let src = "\
l = [10, 20]
l.append(30)
l.set(0, 5)
print(l.get(0) + l.get(2) + l.size())
";
    assert_eq!(run(src), "38\n");
}

#[test]
fn test_list_index_read_and_write() {
    let src = "\
l = [1, 2, 3]
l[1] = 20
print(l[1] + l[2])
";
    assert_eq!(run(src), "23\n");
}

#[test]
fn test_map_literal_get_and_size() {
    let src = "\
m = {\"a\" : 1, \"b\" : 2}
print(m[\"a\"] + m.size())
";
    assert_eq!(run(src), "3\n");
}

#[test]
fn test_map_overwrite_keeps_single_entry() {
    let src = "\
m = {1 : 10}
m[1] = 20
m[2] = 5
print(m[1] + m.size())
";
    assert_eq!(run(src), "22\n");
}

#[test]
fn test_float_arithmetic_widens_ints() {
    assert_eq!(run("print(1 + 0.5)"), "1.5\n");
}

#[test]
fn test_float_comparison() {
    let src = "if 1.5 > 1 then print(\"yes\") else print(\"no\") end";
    assert_eq!(run(src), "yes\n");
}

#[test]
fn test_bitwise_and_shift_operators() {
    assert_eq!(run("print((6 & 3) | (1 << 4))"), "18\n");
}

#[test]
fn test_mod_operator() {
    assert_eq!(run("print(17 % 5)"), "2\n");
}

#[test]
fn test_unary_operators() {
    assert_eq!(run("print(-(3 - 10))"), "7\n");
    assert_eq!(run("print(~0)"), "-1\n");
    let src = "if !false then print(\"t\") else print(\"f\") end";
    assert_eq!(run(src), "t\n");
}

#[test]
fn test_logical_operators() {
    let src = "\
a = true
b = false
if a && !b then print(\"both\") else print(\"nope\") end
if b || false then print(\"or\") else print(\"nor\") end
";
    assert_eq!(run(src), "both\nnor\n");
}

#[test]
fn test_print_boxes_bool_and_float() {
    assert_eq!(run("print(true)"), "true\n");
    assert_eq!(run("print(2.5)"), "2.5\n");
}

#[test]
fn test_string_indexing_and_size() {
    let src = "\
s = \"venom\"
print(s[0] + s[4])
print(s.size())
";
    assert_eq!(run(src), "vm\n5\n");
}

#[test]
fn test_for_over_string() {
    let src = "\
out = \"\"
for c in \"abc\"
  out = out + c
end
print(out)
";
    assert_eq!(run(src), "abc\n");
}

#[test]
fn test_module_level_state_across_functions() {
    let src = "\
count = 0
def bump() :: int =
  count = count + 1
  return count
end
bump()
bump()
print(bump())
";
    assert_eq!(run(src), "3\n");
}

#[test]
fn test_nested_class_in_function_is_lifted() {
    let src = "\
def make() :: int =
  class Counter
    attr n :: int
    def bump() :: int =
      n = n + 1
      return n
    end
  end
  c = Counter()
  c.bump()
  return c.bump()
end
print(make())
";
    assert_eq!(run(src), "2\n");
}

#[test]
fn test_parameterized_class_monomorphization() {
    let src = "\
class Holder{T}
  attr item :: T
  def put(v::T) = item = v; end
  def get() :: T = return item; end
end
h = Holder{int}()
h.put(41)
print(h.get() + 1)
";
    assert_eq!(run(src), "42\n");
}

#[test]
fn test_list_of_strings_prints_via_stringify() {
    let src = "\
l = [\"x\", \"y\"]
print(l)
";
    assert_eq!(run(src), "[x, y]\n");
}

#[test]
fn test_object_identity_equality() {
    let src = "\
class A
end
a = A()
b = a
if a == b then print(\"same\") else print(\"diff\") end
c = A()
if a == c then print(\"same\") else print(\"diff\") end
";
    assert_eq!(run(src), "same\ndiff\n");
}

#[test]
fn test_expression_tail_becomes_return() {
    // a tail expression statement in a non-void function is rewritten into
    // an explicit return
    let src = "\
def f() :: int =
  21 * 2
end
print(f())
";
    assert_eq!(run(src), "42\n");
}
