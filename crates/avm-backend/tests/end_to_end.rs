//! End-to-end compilation tests
//!
//! Method graph in, exact JavaScript source out. Each test uses its own
//! constant pool so the indices it sees do not depend on test order.

use avm_backend::{Backend, BackendConfig, CompileError, CompiledMethod, ConstantPool};
use avm_ir::{
    BinaryOp, CfgError, ConstValue, GraphBuilder, MethodGraph, NodeKind, ObjectHandle,
};

fn compile(graph: &MethodGraph) -> CompiledMethod {
    let pool = ConstantPool::new();
    Backend::with_pool(BackendConfig::default(), &pool)
        .compile(graph)
        .unwrap()
}

// ============================================================================
// Control flow shapes
// ============================================================================

mod control_flow {
    use super::*;

    #[test]
    fn test_if_else_returns() {
        let mut b = GraphBuilder::new("sign", 1);
        let x = b.parameter(0, "x");
        let zero = b.number(0.0);
        let cond = b.binary(BinaryOp::Greater, x, zero);
        let then_block = b.create_block();
        let else_block = b.create_block();
        b.branch(cond, then_block, else_block);
        b.switch_to_block(then_block);
        let one = b.number(1.0);
        b.ret(Some(one));
        b.switch_to_block(else_block);
        let two = b.number(2.0);
        b.ret(Some(two));

        let method = compile(&b.finish());
        assert_eq!(
            method.source,
            "function (x) {\n  if (x > 0) {\n    return 1;\n  } else {\n    return 2;\n  }\n}"
        );
    }

    #[test]
    fn test_single_back_edge_loop() {
        let mut b = GraphBuilder::new("spin", 1);
        let cond = b.parameter(0, "cond");
        let header = b.create_block();
        let exit = b.create_block();
        b.jump(header);
        b.switch_to_block(header);
        b.branch(cond, header, exit);
        b.switch_to_block(exit);
        let zero = b.number(0.0);
        b.ret(Some(zero));
        b.loop_header(header);

        let method = compile(&b.finish());
        assert_eq!(
            method.source,
            "function (cond) {\n  while (true) {\n    if (cond) {\n      continue;\n    } else {\n      break;\n    }\n  }\n  return 0;\n}"
        );
    }

    #[test]
    fn test_irreducible_two_entry_cycle() {
        let mut b = GraphBuilder::new("tangle", 3);
        let x = b.parameter(0, "x");
        let y = b.parameter(1, "y");
        let z = b.parameter(2, "z");
        let left = b.create_block();
        let right = b.create_block();
        let exit = b.create_block();
        b.branch(x, left, right);
        b.switch_to_block(left);
        b.branch(y, right, exit);
        b.switch_to_block(right);
        b.branch(z, left, exit);
        b.switch_to_block(exit);
        b.ret(None);

        let method = compile(&b.finish());
        let expected = "\
function (x, y, z) {
  var $L;
  if (x) {
    $L = 1;
  } else {
    $L = 2;
  }
  while (true) {
    if ($L === 1) {
      if (y) {
        $L = 2;
        continue;
      } else {
        break;
      }
    } else if ($L === 2) {
      if (z) {
        $L = 1;
        continue;
      } else {
        break;
      }
    }
  }
  return;
}";
        assert_eq!(method.source, expected);
    }

    #[test]
    fn test_one_sided_condition_is_negated() {
        let mut b = GraphBuilder::new("count_to", 1);
        let n = b.parameter(0, "n");
        let i = b.variable("i");
        let zero = b.number(0.0);
        b.move_to(i, zero);
        let header = b.create_block();
        let body = b.create_block();
        let exit = b.create_block();
        b.jump(header);

        b.switch_to_block(header);
        let read = b.read(i);
        let cond = b.binary(BinaryOp::Less, read, n);
        b.branch(cond, body, exit);

        b.switch_to_block(body);
        let read = b.read(i);
        let one = b.number(1.0);
        let next = b.binary(BinaryOp::Add, read, one);
        b.move_to(i, next);
        b.jump(header);

        b.switch_to_block(exit);
        let result = b.read(i);
        b.ret(Some(result));

        let method = compile(&b.finish());
        let expected = "\
function (n) {
  var i;
  i = 0;
  while (true) {
    if (!(i < n)) {
      break;
    }
    i = i + 1;
    continue;
  }
  return i;
}";
        assert_eq!(method.source, expected);
    }

    #[test]
    fn test_nested_ifs_share_a_join() {
        let mut b = GraphBuilder::new("guards", 3);
        let p = b.parameter(0, "p");
        let q = b.parameter(1, "q");
        let f = b.parameter(2, "f");
        let inner = b.create_block();
        let body = b.create_block();
        let join = b.create_block();
        b.branch(p, inner, join);
        b.switch_to_block(inner);
        b.branch(q, body, join);
        b.switch_to_block(body);
        b.emit(NodeKind::Call {
            callee: f,
            object: None,
            args: vec![],
        });
        b.jump(join);
        b.switch_to_block(join);
        b.ret(None);

        let method = compile(&b.finish());
        let expected = "\
function (p, q, f) {
  if (p) {
    if (q) {
      f();
    }
  }
  return;
}";
        assert_eq!(method.source, expected);
    }

    #[test]
    fn test_switch_groups_cases() {
        let mut b = GraphBuilder::new("classify", 1);
        let v = b.parameter(0, "v");
        let r = b.variable("r");
        let small = b.create_block();
        let two = b.create_block();
        let other = b.create_block();
        let join = b.create_block();
        b.switch(v, vec![(1, small), (2, two), (3, small), (1, other)], other);

        b.switch_to_block(small);
        let ten = b.number(10.0);
        b.ret(Some(ten));

        b.switch_to_block(two);
        let value = b.number(2.0);
        b.move_to(r, value);
        b.jump(join);

        b.switch_to_block(other);
        let value = b.number(3.0);
        b.move_to(r, value);
        b.jump(join);

        b.switch_to_block(join);
        let result = b.read(r);
        b.ret(Some(result));

        let method = compile(&b.finish());
        let expected = "\
function (v) {
  var r;
  switch (v) {
    case 1:
    case 3:
      return 10;
    case 2:
      r = 2;
      break;
    default:
      r = 3;
      break;
  }
  return r;
}";
        assert_eq!(method.source, expected);
    }

    #[test]
    fn test_break_out_of_loop_from_switch_is_labelled() {
        let mut b = GraphBuilder::new("pump", 1);
        let v = b.parameter(0, "v");
        let header = b.create_block();
        let again = b.create_block();
        let leave = b.create_block();
        let exit = b.create_block();
        b.jump(header);
        b.switch_to_block(header);
        b.switch(v, vec![(0, again)], leave);
        b.switch_to_block(again);
        b.jump(header);
        b.switch_to_block(leave);
        b.jump(exit);
        b.switch_to_block(exit);
        b.ret(None);

        let method = compile(&b.finish());
        let expected = "\
function (v) {
  L0: while (true) {
    switch (v) {
      case 0:
        break;
      default:
        break L0;
    }
    continue;
  }
  return;
}";
        assert_eq!(method.source, expected);
    }

    #[test]
    fn test_try_catch_binds_exception() {
        let mut b = GraphBuilder::new("guarded", 1);
        let f = b.parameter(0, "f");
        let err = b.variable("err");
        let entry = b.entry_block();
        let after = b.create_block();
        let handler = b.create_block();
        b.emit(NodeKind::Call {
            callee: f,
            object: None,
            args: vec![],
        });
        b.jump(after);
        b.switch_to_block(after);
        b.ret(None);
        b.switch_to_block(handler);
        let caught = b.read(err);
        b.ret(Some(caught));
        b.exception_region(entry, vec![entry], handler, Some(err));

        let method = compile(&b.finish());
        let expected = "\
function (f) {
  var err;
  try {
    f();
  } catch ($e) {
    err = $e;
    return err;
  }
  return;
}";
        assert_eq!(method.source, expected);
    }
}

// ============================================================================
// Lowering through the whole pipeline
// ============================================================================

mod lowering {
    use super::*;

    #[test]
    fn test_calls_properties_and_slots() {
        let mut b = GraphBuilder::new("access", 2);
        let obj = b.parameter(0, "obj");
        let key = b.parameter(1, "key");
        let length = b.string("length");
        let class = b.string("class");
        let len = b.node(NodeKind::PropertyGet {
            object: obj,
            name: length,
        });
        let klass = b.node(NodeKind::PropertyGet {
            object: obj,
            name: class,
        });
        let dynamic = b.node(NodeKind::PropertyGet {
            object: obj,
            name: key,
        });
        let slot_index = b.number(3.0);
        let slot = b.node(NodeKind::SlotGet {
            object: obj,
            index: slot_index,
        });
        let this = b.node(NodeKind::This);
        let call = b.emit(NodeKind::Call {
            callee: len,
            object: Some(this),
            args: vec![klass, dynamic, slot],
        });
        let zero = b.number(0.0);
        b.emit(NodeKind::SlotSet {
            object: obj,
            index: zero,
            value: call,
        });
        b.ret(None);

        let method = compile(&b.finish());
        let expected = "\
function (obj, key) {
  var $t10;
  $t10 = obj.length.call(this, getProperty(obj, \"class\"), getProperty(obj, key), getSlot(obj, 3));
  setSlot(obj, 0, $t10);
  return;
}";
        assert_eq!(method.source, expected);
    }

    #[test]
    fn test_scope_and_runtime_primitives() {
        let mut b = GraphBuilder::new("scoped", 1);
        let parent = b.parameter(0, "parent");
        let this = b.node(NodeKind::This);
        let scope_create = NodeKind::ScopeCreate {
            parent,
            object: this,
            is_with: false,
        };
        let scope_var = b.variable("scope");
        b.emit_into(scope_var, scope_create);
        let s = b.read(scope_var);
        let name = b.string("trace");
        let domain = b.constant(ConstValue::Null);
        let found = b.node(NodeKind::FindProperty {
            scope: s,
            name,
            domain,
            strict: true,
        });
        b.ret(Some(found));

        let method = compile(&b.finish());
        assert_eq!(
            method.body,
            "var scope;\nscope = new Scope(parent, this, false);\nreturn scope.findProperty(\"trace\", null, true);\n"
        );
    }

    #[test]
    fn test_object_constants_use_pool_indices() {
        let pool = ConstantPool::new();
        let backend = Backend::with_pool(BackendConfig::default(), &pool);
        let first = ObjectHandle::new("Multiname(a)");
        let second = ObjectHandle::new("Multiname(b)");

        let graph = |object: &ObjectHandle| {
            let mut b = GraphBuilder::new("load", 0);
            let c = b.constant(ConstValue::Object(object.clone()));
            b.ret(Some(c));
            b.finish()
        };
        assert_eq!(backend.compile(&graph(&first)).unwrap().body, "return $C[0];\n");
        assert_eq!(backend.compile(&graph(&second)).unwrap().body, "return $C[1];\n");
        assert_eq!(backend.compile(&graph(&first)).unwrap().body, "return $C[0];\n");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_printing_is_deterministic() {
        let mut b = GraphBuilder::new("again", 1);
        let x = b.parameter(0, "x");
        let neg = b.number(-0.0);
        let sum = b.binary(BinaryOp::Sub, x, neg);
        b.ret(Some(sum));
        let graph = b.finish();

        let first = compile(&graph);
        let second = compile(&graph);
        assert_eq!(first, second);
        assert_eq!(first.body, "return x - -0;\n");
    }
}

// ============================================================================
// JSON input and failures
// ============================================================================

mod input {
    use super::*;

    #[test]
    fn test_json_fixture_if_else() {
        let pool = ConstantPool::new();
        let backend = Backend::with_pool(BackendConfig::default(), &pool);
        let method = backend
            .compile_json(include_str!("fixtures/sign.json"))
            .unwrap();
        assert_eq!(method.name, "sign");
        assert_eq!(
            method.source,
            "function (x) {\n  if (x > 0) {\n    return 1;\n  } else {\n    return -1;\n  }\n}"
        );
    }

    #[test]
    fn test_json_fixture_loop() {
        let pool = ConstantPool::new();
        let backend = Backend::with_pool(BackendConfig::default(), &pool);
        let method = backend
            .compile_json(include_str!("fixtures/counter.json"))
            .unwrap();
        assert_eq!(method.parameters, vec!["n".to_string()]);
        assert_eq!(
            method.body,
            "var i;\ni = 0;\nwhile (true) {\n  if (!(i < n)) {\n    break;\n  }\n  i = i + 1;\n  continue;\n}\nreturn i;\n"
        );
    }

    #[test]
    fn test_config_from_json() {
        let config = BackendConfig::from_json(r#"{ "label_variable": "$label" }"#).unwrap();
        assert_eq!(config.label_variable, "$label");
        assert_eq!(config.constants_name, "$C");
    }

    #[test]
    fn test_malformed_graph_is_fatal() {
        let mut b = GraphBuilder::new("open", 0);
        let dangling = b.create_block();
        b.jump(dangling);
        let pool = ConstantPool::new();
        let err = Backend::with_pool(BackendConfig::default(), &pool)
            .compile(&b.finish())
            .unwrap_err();
        assert!(matches!(
            err,
            CompileError::MalformedCfg(CfgError::MissingTerminator(_))
        ));
    }
}
