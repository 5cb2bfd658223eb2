//! Structural round-trips through the exporter and bit-exact MathML/script
//! parity, driven by generated expression trees.

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use daveml_common::ValueCell;
use daveml_eval::ast::{Context, ExprNode};
use daveml_eval::error::EvalError;
use daveml_eval::export::export_math;
use daveml_eval::parser::parse_math;
use daveml_eval::script::{dynamic_to_f64, ScriptRuntime};
use daveml_eval::transpile::transpile;
use daveml_eval::{ops, Model, VarMethod};
use daveml_schema::XmlDoc;

fn op(tag: &str) -> &'static ops::Operator {
    ops::lookup(tag).expect("operator table entry")
}

fn leaf_cn(value: f64) -> ExprNode {
    let mut node = ExprNode::new(op("cn"));
    node.literal = value;
    node
}

fn leaf_ci(index: usize) -> ExprNode {
    let mut node = ExprNode::new(op("ci"));
    node.var_index = Some(index);
    node
}

/// `<apply><tag/>…</apply>` the way the parser builds it.
fn apply_op(tag: &str, children: Vec<ExprNode>) -> ExprNode {
    let mut operator = ExprNode::new(op(tag));
    operator.children = children;
    let mut apply = ExprNode::new(op("apply"));
    apply.ret = operator.ret;
    apply.children.push(operator);
    apply
}

/// piecewise{ piece(v1, cond < 0), otherwise(v2) }
fn piecewise_of(v1: ExprNode, condition_operand: ExprNode, v2: ExprNode) -> ExprNode {
    let comparison = apply_op("lt", vec![condition_operand, leaf_cn(0.0)]);
    let mut piece = ExprNode::new(op("piece"));
    piece.children = vec![v1, comparison];
    let mut otherwise = ExprNode::new(op("otherwise"));
    otherwise.children = vec![v2];
    let mut piecewise = ExprNode::new(op("piecewise"));
    piecewise.children = vec![piece, otherwise];
    piecewise
}

fn arb_tree() -> impl Strategy<Value = ExprNode> {
    let leaf = prop_oneof![
        (-200i32..200).prop_map(|v| leaf_cn(v as f64 / 4.0)),
        (0usize..3).prop_map(leaf_ci),
    ];
    leaf.prop_recursive(3, 24, 3, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| apply_op("plus", vec![a, b])),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| apply_op("minus", vec![a, b])),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| apply_op("times", vec![a, b])),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| apply_op("divide", vec![a, b])),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| apply_op("min", vec![a, b])),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| apply_op("max", vec![a, b])),
            inner.clone().prop_map(|a| apply_op("abs", vec![a])),
            inner.clone().prop_map(|a| apply_op("sin", vec![a])),
            inner.clone().prop_map(|a| apply_op("floor", vec![a])),
            inner.clone().prop_map(|a| apply_op("minus", vec![a])),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(a, c, b)| piecewise_of(a, c, b)),
        ]
    })
}

struct FixedVars(Vec<f64>);

impl Context for FixedVars {
    fn scalar(&self, index: usize) -> Result<f64, EvalError> {
        Ok(self.0[index])
    }

    fn cell(&self, index: usize) -> Result<ValueCell, EvalError> {
        Ok(ValueCell::scalar(self.0[index]))
    }
}

fn namer(index: usize) -> String {
    format!("v{index}")
}

fn resolver(name: &str) -> Option<usize> {
    name.strip_prefix('v').and_then(|n| n.parse().ok())
}

proptest! {
    /// parse(print(tree)) is structurally identical to tree.
    #[test]
    fn exporter_roundtrip(tree in arb_tree()) {
        let xml = export_math(&tree, &namer);
        let doc = XmlDoc::parse(&xml).expect("exported MathML parses as XML");
        let reparsed = parse_math(&doc.root, &resolver).expect("exported MathML parses");
        prop_assert_eq!(&tree, &reparsed, "round-trip changed the tree: {}", xml);
    }

    /// Tree evaluation and transpiled-script evaluation agree bit-exactly on
    /// finite results and agree on NaN-ness otherwise.
    #[test]
    fn transpiled_script_parity(tree in arb_tree()) {
        let vars = FixedVars(vec![0.3, -1.7, 2.5]);
        let direct = tree.eval_scalar(&vars).expect("scalar evaluation").value;

        let script = transpile(&tree, &namer).expect("scalar trees transpile");
        let runtime = ScriptRuntime::new();
        let ast = runtime.compile(&script)
            .map_err(|e| TestCaseError::fail(format!("script compile: {e}\n{script}")))?;
        let mut scope = rhai::Scope::new();
        for (i, v) in vars.0.iter().enumerate() {
            scope.push(format!("v{i}"), *v);
        }
        let result = runtime.eval(&ast, &mut scope)
            .map_err(|e| TestCaseError::fail(format!("script eval: {e}\n{script}")))?;
        let scripted = dynamic_to_f64(&result)
            .ok_or_else(|| TestCaseError::fail(format!("non-numeric result\n{script}")))?;

        let agree = (direct.is_nan() && scripted.is_nan()) || direct == scripted;
        prop_assert!(agree, "MathML {} != script {} for\n{}", direct, scripted, script);
    }
}

#[test]
fn parity_conversion_switches_eligible_variables_to_scripts() {
    let m = Model::from_xml(
        r#"<DAVEfunc>
             <variableDef name="x" varID="x" units=""><isInput/></variableDef>
             <variableDef name="scalar" varID="scalar" units="">
               <calculation><math>
                 <apply><times/><cn>2</cn><ci>x</ci></apply>
               </math></calculation>
             </variableDef>
             <variableDef name="M" varID="M" units="">
               <dimensionDef><dim>2</dim><dim>2</dim></dimensionDef>
               <array>1 0 0 1</array>
             </variableDef>
             <variableDef name="matrixy" varID="matrixy" units="">
               <dimensionDef><dim>2</dim><dim>2</dim></dimensionDef>
               <calculation><math>
                 <apply><transpose/><ci>M</ci></apply>
               </math></calculation>
             </variableDef>
           </DAVEfunc>"#,
    )
    .unwrap();

    let scalar = m.variable_index("scalar").unwrap();
    let matrixy = m.variable_index("matrixy").unwrap();

    // Scalar MathML accelerates to the script path; matrix MathML never does.
    assert_eq!(m.variable(scalar).method, VarMethod::Script);
    assert_eq!(m.variable(matrixy).method, VarMethod::MathML);

    // Both still answer correctly.
    let x = m.variable_index("x").unwrap();
    m.set_value(x, 21.0, false).unwrap();
    assert_eq!(m.value(scalar).unwrap(), 42.0);
    assert_eq!(
        m.matrix(matrixy).unwrap(),
        daveml_common::DMat::identity(2, 2)
    );
}
