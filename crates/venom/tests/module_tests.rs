//! Multi-module tests driving import resolution and cross-module linking.

use ahash::AHashMap;
use pretty_assertions::assert_eq;
use venom::{CompileError, ModuleLoader, run_source_with_loader};

struct MapLoader {
    modules: AHashMap<String, String>,
}

impl MapLoader {
    fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            modules: entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        }
    }
}

impl ModuleLoader for MapLoader {
    fn load(&self, dotted: &str) -> Result<String, CompileError> {
        self.modules.get(dotted).cloned().ok_or_else(|| {
            CompileError::semantic(format!("No such file to import module {dotted}"))
        })
    }
}

#[test]
fn test_import_and_call_across_modules() {
    let loader = MapLoader::new(&[(
        "lib",
        "def double(v::int) :: int = return v * 2; end",
    )]);
    let src = "\
import lib
print(lib.double(21))
";
    assert_eq!(run_source_with_loader(src, &loader).unwrap(), "42\n");
}

#[test]
fn test_imported_class_construction() {
    let loader = MapLoader::new(&[(
        "shapes",
        "\
class Square
  attr side :: int
  def ctor(s::int) = side = s; end
  def area() :: int = return side * side; end
end
",
    )]);
    let src = "\
import shapes
sq = shapes.Square(6)
print(sq.area())
";
    assert_eq!(run_source_with_loader(src, &loader).unwrap(), "36\n");
}

#[test]
fn test_transitive_import_runs_once() {
    let loader = MapLoader::new(&[
        ("a", "import b\ndef one() :: int = return b.base() + 1; end"),
        ("b", "def base() :: int = return 40; end"),
    ]);
    let src = "\
import a
print(a.one() + 1)
";
    assert_eq!(run_source_with_loader(src, &loader).unwrap(), "42\n");
}

#[test]
fn test_dotted_import_path() {
    let loader = MapLoader::new(&[(
        "util.math",
        "def triple(v::int) :: int = return v * 3; end",
    )]);
    let src = "\
import util.math
print(math.triple(14))
";
    assert_eq!(run_source_with_loader(src, &loader).unwrap(), "42\n");
}

#[test]
fn test_module_level_state_is_per_singleton() {
    let loader = MapLoader::new(&[(
        "counter",
        "\
n = 0
def bump() :: int =
  n = n + 1
  return n
end
",
    )]);
    let src = "\
import counter
counter.bump()
print(counter.bump())
";
    assert_eq!(run_source_with_loader(src, &loader).unwrap(), "2\n");
}
