//! End-to-end scenarios over models loaded from DAVE-ML XML.

use assert_approx_eq::assert_approx_eq;
use daveml_eval::Model;

fn model(xml: &str) -> Model {
    Model::from_xml(xml).expect("model should load")
}

fn idx(model: &Model, var_id: &str) -> usize {
    model
        .variable_index(var_id)
        .unwrap_or_else(|| panic!("unknown varID {var_id}"))
}

#[test]
fn scalar_piecewise_with_clamp() {
    let m = model(
        r#"<DAVEfunc>
             <variableDef name="x" varID="x" units=""><isInput/></variableDef>
             <variableDef name="y" varID="y" units="" minValue="0" maxValue="50">
               <isOutput/>
               <calculation><math>
                 <piecewise>
                   <piece>
                     <apply><times/><cn>2</cn><ci>x</ci></apply>
                     <apply><lt/><ci>x</ci><cn>0</cn></apply>
                   </piece>
                   <piece>
                     <apply><power/><ci>x</ci><cn>2</cn></apply>
                     <apply><and/>
                       <apply><geq/><ci>x</ci><cn>0</cn></apply>
                       <apply><leq/><ci>x</ci><cn>10</cn></apply>
                     </apply>
                   </piece>
                   <otherwise><cn>100</cn></otherwise>
                 </piecewise>
               </math></calculation>
             </variableDef>
           </DAVEfunc>"#,
    );
    let x = idx(&m, "x");
    let y = idx(&m, "y");

    m.set_value(x, -3.0, false).unwrap();
    assert_eq!(m.value(y).unwrap(), 0.0, "-6 clamps up to the minimum");

    m.set_value(x, 5.0, false).unwrap();
    assert_eq!(m.value(y).unwrap(), 25.0);

    m.set_value(x, 20.0, false).unwrap();
    assert_eq!(m.value(y).unwrap(), 50.0, "100 clamps down to the maximum");
}

#[test]
fn matrix_mathml_product_plus_offset() {
    let m = model(
        r#"<DAVEfunc>
             <variableDef name="A" varID="A" units="">
               <dimensionDef><dim>2</dim><dim>2</dim></dimensionDef>
               <array>1 2 3 4</array>
             </variableDef>
             <variableDef name="b" varID="b" units="">
               <dimensionDef><dim>2</dim><dim>1</dim></dimensionDef>
               <array>5 6</array>
             </variableDef>
             <variableDef name="o" varID="o" units="">
               <dimensionDef><dim>2</dim><dim>1</dim></dimensionDef>
               <array>0 1</array>
             </variableDef>
             <variableDef name="c" varID="c" units="">
               <isOutput/>
               <dimensionDef><dim>2</dim><dim>1</dim></dimensionDef>
               <calculation><math>
                 <apply><plus/>
                   <apply><times/><ci>A</ci><ci>b</ci></apply>
                   <ci>o</ci>
                 </apply>
               </math></calculation>
             </variableDef>
           </DAVEfunc>"#,
    );
    let c = idx(&m, "c");
    assert_eq!(m.vector(c).unwrap(), vec![17.0, 40.0]);

    // Matrix-shape invariant: the result keeps the declared shape.
    let v = m.variable(c);
    assert_eq!((v.matrix.nrows(), v.matrix.ncols()), (2, 1));
}

#[test]
fn matrix_operators_determinant_and_selection() {
    let m = model(
        r#"<DAVEfunc>
             <variableDef name="A" varID="A" units="">
               <dimensionDef><dim>2</dim><dim>2</dim></dimensionDef>
               <array>1 2 3 4</array>
             </variableDef>
             <variableDef name="detA" varID="detA" units="">
               <calculation><math>
                 <apply><determinant/><ci>A</ci></apply>
               </math></calculation>
             </variableDef>
             <variableDef name="a12" varID="a12" units="">
               <calculation><math>
                 <apply><selector other="element"/><ci>A</ci><cn>1</cn><cn>2</cn></apply>
               </math></calculation>
             </variableDef>
           </DAVEfunc>"#,
    );
    assert_approx_eq!(m.value(idx(&m, "detA")).unwrap(), -2.0, 1e-12);
    assert_eq!(m.value(idx(&m, "a12")).unwrap(), 2.0);
}

#[test]
fn degree_trig_and_atan2d() {
    let m = model(
        r#"<DAVEfunc>
             <variableDef name="y" varID="y" units="">
               <calculation><math>
                 <apply><csymbol>sind</csymbol><cn>30</cn></apply>
               </math></calculation>
             </variableDef>
             <variableDef name="theta" varID="theta" units="deg">
               <calculation><math>
                 <apply><csymbol>atan2d</csymbol><cn>1</cn><cn>1</cn></apply>
               </math></calculation>
             </variableDef>
           </DAVEfunc>"#,
    );
    assert_approx_eq!(m.value(idx(&m, "y")).unwrap(), 0.5, 1e-15);
    assert_approx_eq!(m.value(idx(&m, "theta")).unwrap(), 45.0, 1e-12);
}

#[test]
fn normal_variance_propagates_through_linear_formula() {
    let m = model(
        r#"<DAVEfunc>
             <variableDef name="x" varID="x" units="">
               <isInput/>
               <uncertainty effect="additive">
                 <normalPDF numSigmas="1"><bounds>1.0</bounds></normalPDF>
               </uncertainty>
             </variableDef>
             <variableDef name="y" varID="y" units="">
               <isOutput/>
               <calculation><math>
                 <apply><plus/>
                   <apply><times/><cn>2</cn><ci>x</ci></apply>
                   <cn>3</cn>
                 </apply>
               </math></calculation>
             </variableDef>
           </DAVEfunc>"#,
    );
    let x = idx(&m, "x");
    let y = idx(&m, "y");
    m.set_value(x, 0.0, false).unwrap();

    assert_approx_eq!(m.variance(x).unwrap(), 1.0, 1e-12);
    assert_approx_eq!(m.variance(y).unwrap(), 4.0, 1e-6);
    assert_approx_eq!(m.uncertainty_value_sigmas(y, 1).unwrap(), 2.0, 1e-6);

    // The sweep restores the nominal state.
    assert_eq!(m.value(x).unwrap(), 0.0);
    assert_eq!(m.value(y).unwrap(), 3.0);
}

#[test]
fn uniform_bounds_by_vertex_enumeration() {
    let m = model(
        r#"<DAVEfunc>
             <variableDef name="x" varID="x" units="">
               <isInput/>
               <uncertainty effect="additive">
                 <uniformPDF><bounds>1.0</bounds></uniformPDF>
               </uncertainty>
             </variableDef>
             <variableDef name="yv" varID="yv" units="">
               <isInput/>
               <uncertainty effect="additive">
                 <uniformPDF><bounds>2.0</bounds></uniformPDF>
               </uncertainty>
             </variableDef>
             <variableDef name="z" varID="z" units="">
               <isOutput/>
               <calculation><math>
                 <apply><times/><ci>x</ci><ci>yv</ci></apply>
               </math></calculation>
             </variableDef>
           </DAVEfunc>"#,
    );
    let x = idx(&m, "x");
    let z = idx(&m, "z");
    m.set_value(x, 0.0, false).unwrap();
    m.set_value(idx(&m, "yv"), 0.0, false).unwrap();

    assert_approx_eq!(m.uncertainty_bound(z, false).unwrap(), -2.0, 1e-9);
    assert_approx_eq!(m.uncertainty_bound(z, true).unwrap(), 2.0, 1e-9);

    // Inputs restored to nominal after the enumeration.
    assert_eq!(m.value(x).unwrap(), 0.0);
    assert_eq!(m.value(z).unwrap(), 0.0);
}

#[test]
fn dependency_invalidation() {
    let m = model(
        r#"<DAVEfunc>
             <variableDef name="b" varID="b" units=""><isInput/></variableDef>
             <variableDef name="c" varID="c" units=""><isInput/></variableDef>
             <variableDef name="a" varID="a" units="">
               <isOutput/>
               <calculation><math>
                 <apply><plus/><ci>b</ci><ci>c</ci></apply>
               </math></calculation>
             </variableDef>
           </DAVEfunc>"#,
    );
    let a = idx(&m, "a");
    let b = idx(&m, "b");
    let c = idx(&m, "c");

    m.set_value(b, 1.0, false).unwrap();
    m.set_value(c, 2.0, false).unwrap();
    assert_eq!(m.value(a).unwrap(), 3.0);

    m.set_value(c, 5.0, false).unwrap();
    assert_eq!(m.value(a).unwrap(), 6.0);

    // Set b without reading, then c; the read reflects both.
    m.set_value(b, 0.0, false).unwrap();
    m.set_value(c, 7.0, false).unwrap();
    assert_eq!(m.value(a).unwrap(), 7.0);

    // Idempotence: a second read without intervening sets is identical.
    assert_eq!(m.value(a).unwrap(), 7.0);
}

#[test]
fn cached_reads_match_fresh_recomputation() {
    let xml = r#"<DAVEfunc>
         <variableDef name="u" varID="u" units=""><isInput/></variableDef>
         <variableDef name="v" varID="v" units="">
           <calculation><math>
             <apply><times/><ci>u</ci><ci>u</ci></apply>
           </math></calculation>
         </variableDef>
         <variableDef name="w" varID="w" units="">
           <isOutput/>
           <calculation><math>
             <apply><plus/><ci>v</ci><apply><csymbol>sind</csymbol><ci>u</ci></apply></apply>
           </math></calculation>
         </variableDef>
       </DAVEfunc>"#;

    let warm = model(xml);
    let u = idx(&warm, "u");
    let w = idx(&warm, "w");
    for &x in &[0.0, 1.0, -4.0, 30.0, 12.5] {
        warm.set_value(u, x, false).unwrap();
        let cached = warm.value(w).unwrap();

        let fresh = model(xml);
        fresh.set_value(idx(&fresh, "u"), x, false).unwrap();
        let recomputed = fresh.value(idx(&fresh, "w")).unwrap();
        assert_eq!(cached, recomputed, "cache must match a fresh engine at x={x}");
    }
}

#[test]
fn gridded_table_interpolation() {
    let m = model(
        r#"<DAVEfunc>
             <variableDef name="alpha" varID="alpha" units="deg"><isInput/></variableDef>
             <variableDef name="CL" varID="CL" units=""><isOutput/></variableDef>
             <breakpointDef bpID="ALP"><bpVals>0 5 10</bpVals></breakpointDef>
             <function name="CLfn">
               <independentVarRef varID="alpha"/>
               <dependentVarRef varID="CL"/>
               <functionDefn>
                 <griddedTableDef>
                   <breakpointRefs><bpRef bpID="ALP"/></breakpointRefs>
                   <dataTable>0.0 0.5 0.8</dataTable>
                 </griddedTableDef>
               </functionDefn>
             </function>
           </DAVEfunc>"#,
    );
    let alpha = idx(&m, "alpha");
    let cl = idx(&m, "CL");

    m.set_value(alpha, 2.5, false).unwrap();
    assert_approx_eq!(m.value(cl).unwrap(), 0.25, 1e-12);

    m.set_value(alpha, 7.5, false).unwrap();
    assert_approx_eq!(m.value(cl).unwrap(), 0.65, 1e-12);

    // Endpoint-held extrapolation.
    m.set_value(alpha, 99.0, false).unwrap();
    assert_approx_eq!(m.value(cl).unwrap(), 0.8, 1e-12);
}

#[test]
fn string_table_lookup() {
    let m = model(
        r#"<DAVEfunc>
             <variableDef name="gear" varID="gear" units=""><isInput/></variableDef>
             <variableDef name="mode" varID="mode" units=""></variableDef>
             <breakpointDef bpID="G"><bpVals>1 2 3</bpVals></breakpointDef>
             <function name="modefn">
               <independentVarRef varID="gear"/>
               <dependentVarRef varID="mode"/>
               <functionDefn>
                 <griddedTableDef>
                   <breakpointRefs><bpRef bpID="G"/></breakpointRefs>
                   <dataTable type="string">up transit down</dataTable>
                 </griddedTableDef>
               </functionDefn>
             </function>
           </DAVEfunc>"#,
    );
    let gear = idx(&m, "gear");
    let mode = idx(&m, "mode");

    m.set_value(gear, 2.0, false).unwrap();
    assert_eq!(m.string_value(mode).unwrap(), "transit");

    // Nearest-integer rounding of the input.
    m.set_value(gear, 2.9, false).unwrap();
    assert_eq!(m.string_value(mode).unwrap(), "down");
}

#[test]
fn scripted_variable_with_sticky_set() {
    let m = model(
        r#"<DAVEfunc>
             <variableDef name="gain" varID="gain" units=""><isInput/></variableDef>
             <variableDef name="trim" varID="trim" units=""></variableDef>
             <variableDef name="cmd" varID="cmd" units="">
               <isOutput/>
               <script><![CDATA[setVarDefSticky( trim, gain * 2.0 ); gain + 1.0]]></script>
             </variableDef>
           </DAVEfunc>"#,
    );
    let gain = idx(&m, "gain");
    let trim = idx(&m, "trim");
    let cmd = idx(&m, "cmd");

    m.set_value(gain, 3.0, false).unwrap();
    assert_eq!(m.value(cmd).unwrap(), 4.0);
    assert_eq!(m.value(trim).unwrap(), 6.0, "sticky set persists");

    m.set_value(gain, 5.0, false).unwrap();
    assert_eq!(m.value(cmd).unwrap(), 6.0);
    assert_eq!(m.value(trim).unwrap(), 10.0);
}

#[test]
fn script_self_reference_reads_previous_value() {
    let m = model(
        r#"<DAVEfunc>
             <variableDef name="step" varID="step" units=""><isInput/></variableDef>
             <variableDef name="acc" varID="acc" units="" initialValue="0">
               <script><![CDATA[acc = acc + step; acc]]></script>
             </variableDef>
           </DAVEfunc>"#,
    );
    let step = idx(&m, "step");
    let acc = idx(&m, "acc");

    m.set_value(step, 1.5, false).unwrap();
    assert_eq!(m.value(acc).unwrap(), 1.5);
    // Cached: no re-evaluation without an input change.
    assert_eq!(m.value(acc).unwrap(), 1.5);

    m.set_value(step, 2.0, false).unwrap();
    assert_eq!(m.value(acc).unwrap(), 3.5);
}

#[test]
fn perturbation_attaches_and_retunes() {
    let mut m = model(
        r#"<DAVEfunc>
             <variableDef name="thrust" varID="thrust" units="N" initialValue="5"></variableDef>
           </DAVEfunc>"#,
    );
    let thrust = idx(&m, "thrust");
    assert_eq!(m.value(thrust).unwrap(), 5.0);

    m.set_perturbation(thrust, daveml_eval::Effect::Additive, 0.5)
        .unwrap();
    assert_eq!(m.value(thrust).unwrap(), 5.5);

    m.set_perturbation(thrust, daveml_eval::Effect::Multiplicative, 2.0)
        .unwrap();
    assert_eq!(m.value(thrust).unwrap(), 10.0);
}

#[test]
fn forced_set_overrides_non_input_and_shape() {
    let m = model(
        r#"<DAVEfunc>
             <variableDef name="x" varID="x" units=""><isInput/></variableDef>
             <variableDef name="y" varID="y" units="">
               <isOutput/>
               <calculation><math>
                 <apply><times/><cn>2</cn><ci>x</ci></apply>
               </math></calculation>
             </variableDef>
           </DAVEfunc>"#,
    );
    let x = idx(&m, "x");
    let y = idx(&m, "y");

    m.set_value(x, 4.0, false).unwrap();
    assert_eq!(m.value(y).unwrap(), 8.0);

    // A forced set pins the output until its inputs change again.
    m.set_value(y, 99.0, true).unwrap();
    assert_eq!(m.value(y).unwrap(), 99.0);
    m.set_value(x, 5.0, false).unwrap();
    assert_eq!(m.value(y).unwrap(), 10.0);
}

#[test]
fn load_failures() {
    // Duplicate varID.
    assert!(Model::from_xml(
        r#"<DAVEfunc>
             <variableDef name="x" varID="x" units=""/>
             <variableDef name="x2" varID="x" units=""/>
           </DAVEfunc>"#
    )
    .is_err());

    // Unresolved identifier inside MathML.
    assert!(Model::from_xml(
        r#"<DAVEfunc>
             <variableDef name="y" varID="y" units="">
               <calculation><math><apply><plus/><ci>ghost</ci><cn>1</cn></apply></math></calculation>
             </variableDef>
           </DAVEfunc>"#
    )
    .is_err());

    // MathML self-reference.
    assert!(Model::from_xml(
        r#"<DAVEfunc>
             <variableDef name="y" varID="y" units="">
               <calculation><math><apply><plus/><ci>y</ci><cn>1</cn></apply></math></calculation>
             </variableDef>
           </DAVEfunc>"#
    )
    .is_err());

    // Dependency cycle.
    assert!(Model::from_xml(
        r#"<DAVEfunc>
             <variableDef name="p" varID="p" units="">
               <calculation><math><apply><plus/><ci>q</ci><cn>1</cn></apply></math></calculation>
             </variableDef>
             <variableDef name="q" varID="q" units="">
               <calculation><math><apply><plus/><ci>p</ci><cn>1</cn></apply></math></calculation>
             </variableDef>
           </DAVEfunc>"#
    )
    .is_err());

    // Array size inconsistent with dimensions.
    assert!(Model::from_xml(
        r#"<DAVEfunc>
             <variableDef name="A" varID="A" units="">
               <dimensionDef><dim>2</dim><dim>2</dim></dimensionDef>
               <array>1 2 3</array>
             </variableDef>
           </DAVEfunc>"#
    )
    .is_err());

    // Scripts may not contain return statements.
    assert!(Model::from_xml(
        r#"<DAVEfunc>
             <variableDef name="s" varID="s" units="">
               <script><![CDATA[return 1.0;]]></script>
             </variableDef>
           </DAVEfunc>"#
    )
    .is_err());

    // Scripts may not set input variables.
    assert!(Model::from_xml(
        r#"<DAVEfunc>
             <variableDef name="x" varID="x" units=""><isInput/></variableDef>
             <variableDef name="s" varID="s" units="">
               <script><![CDATA[setVarDef( x, 1.0 ); x]]></script>
             </variableDef>
           </DAVEfunc>"#
    )
    .is_err());
}

#[test]
fn type_errors_surface_to_the_caller() {
    let m = model(
        r#"<DAVEfunc>
             <variableDef name="A" varID="A" units="">
               <dimensionDef><dim>2</dim><dim>2</dim></dimensionDef>
               <array>1 2 3 4</array>
             </variableDef>
             <variableDef name="bad" varID="bad" units="">
               <calculation><math>
                 <apply><quotient/><ci>A</ci><cn>2</cn></apply>
               </math></calculation>
             </variableDef>
           </DAVEfunc>"#,
    );
    let a = idx(&m, "A");
    let bad = idx(&m, "bad");

    assert!(m.value(bad).is_err(), "matrix argument to a scalar operator");
    assert!(m.value(a).is_err(), "scalar read of a matrix variable");
    assert!(m.matrix(a).is_ok(), "the rest of the model stays consistent");
}
