use nnssa_shape_inference::Shape;
use nnssa_testing::TestCases;
use serde_json::{json, Value};

use super::{convert, ConversionContext, ConvertOptions, LoweringRegistry, SsaConverter};
use crate::error::{ConvertError, ConvertErrorKind};
use crate::network::layers::{Branch, Loop, Transpose, Unary, UnaryMode};
use crate::network::NeuralNetwork;
use crate::ssa::{SsaNode, SsaProgram};

fn parse_program(json: Value) -> SsaProgram {
    SsaProgram::from_json(&json.to_string()).unwrap()
}

fn layer_kinds(network: &NeuralNetwork) -> Vec<&str> {
    network.layers.iter().map(|l| l.kind()).collect()
}

fn layer_names(network: &NeuralNetwork) -> Vec<&str> {
    network.layers.iter().map(|l| l.name.as_str()).collect()
}

fn output_shape(network: &NeuralNetwork, name: &str) -> Option<Shape> {
    network
        .outputs
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.shape.clone())
}

#[test]
fn test_convert_transpose_of_constant() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "c", "op": "Const", "value": {"shape": [2, 3], "data": [0., 1., 2., 3., 4., 5.]}},
                {"name": "t", "op": "Transpose", "inputs": ["c"], "attrs": {"dim": [1, 0]}}
            ]
        }
    }));

    let network = convert(&program, None, None).unwrap();

    assert_eq!(layer_kinds(&network), ["LoadConstantNd", "Transpose"]);
    let transpose = network.layer("t").unwrap();
    assert_eq!(
        transpose.op.downcast_ref::<Transpose>().map(|t| t.axes.clone()),
        Some(vec![1, 0])
    );
    assert_eq!(transpose.output_tensors[0].dims, [3, 2]);
    assert_eq!(output_shape(&network, "t"), Some(vec![3, 2]));
}

#[test]
fn test_convert_broadcast_and_reduce() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "x", "op": "Placeholder", "shape": [1, 4]},
                {"name": "y", "op": "Placeholder", "shape": [3, 1]},
                {"name": "s", "op": "Add", "inputs": ["x", "y"]},
                {
                    "name": "r",
                    "op": "Sum",
                    "inputs": ["s"],
                    "attrs": {"reduction_indices": [0], "keep_dims": false}
                }
            ]
        }
    }));

    let network = convert(&program, None, None).unwrap();

    assert_eq!(layer_kinds(&network), ["AddBroadcastable", "ReduceSum"]);
    assert_eq!(network.layer("s").unwrap().output_tensors[0].dims, [3, 4]);
    assert_eq!(output_shape(&network, "r"), Some(vec![4]));
}

#[test]
fn test_constant_inputs_are_removed() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "x", "op": "Placeholder", "shape": [2, 3]},
                {"name": "perm", "op": "Const", "value": {"shape": [2], "data": [1., 0.]}},
                {"name": "t", "op": "Transpose", "inputs": ["x", "perm"]}
            ]
        }
    }));

    let network = convert(&program, None, None).unwrap();

    assert_eq!(layer_names(&network), ["t"]);
    assert_eq!(network.layer("t").unwrap().inputs, ["x"]);
    assert_eq!(output_shape(&network, "t"), Some(vec![3, 2]));
}

#[test]
fn test_convert_request_validation() {
    #[derive(Debug)]
    struct Case {
        top_func: Option<&'static str>,
        inputs: Option<Vec<(&'static str, Shape)>>,
        outputs: Option<Vec<&'static str>>,
        expected: Result<Vec<(&'static str, Shape)>, &'static str>,
    }

    let cases = [
        Case {
            top_func: None,
            inputs: Some(vec![("x", vec![2, 4])]),
            outputs: None,
            expected: Ok(vec![("x", vec![2, 4]), ("s", vec![1])]),
        },
        Case {
            top_func: Some("missing"),
            inputs: Some(vec![("x", vec![2, 4])]),
            outputs: None,
            expected: Err("top level function \"missing\" not found in program"),
        },
        Case {
            top_func: None,
            inputs: Some(vec![("z", vec![2, 4])]),
            outputs: None,
            expected: Err("\"z\" is not an input of function \"main\""),
        },
        Case {
            top_func: None,
            inputs: Some(vec![("x", vec![-1, 4])]),
            outputs: None,
            expected: Err("supplied input \"x\" has non-static shape [-1, 4]"),
        },
        Case {
            top_func: None,
            inputs: Some(vec![("x", vec![2, 5])]),
            outputs: None,
            expected: Err(
                "input \"x\" expects a shape compatible with Some([-1, 4]), but is given [2, 5]",
            ),
        },
        Case {
            top_func: None,
            inputs: None,
            outputs: None,
            expected: Err("input \"x\" has non-static shape Some([-1, 4]), please provide its shape"),
        },
        Case {
            top_func: None,
            inputs: Some(vec![("x", vec![2, 4])]),
            outputs: Some(vec!["x"]),
            expected: Err("\"x\" is not an output of function \"main\""),
        },
    ];

    cases.test_each(|case| {
        let program = parse_program(json!({
            "functions": {
                "main": [
                    {"name": "x", "op": "Placeholder", "shape": [-1, 4]},
                    {"name": "s", "op": "Placeholder", "shape": []},
                    {"name": "y", "op": "Relu", "inputs": ["x"]}
                ]
            }
        }));

        let result = SsaConverter::new(
            &program,
            case.top_func,
            case.inputs.as_deref(),
            case.outputs.as_deref(),
        );
        match &case.expected {
            Ok(shapes) => {
                let converter = result.unwrap();
                let actual: Vec<_> = converter
                    .input_shapes()
                    .iter()
                    .map(|(name, shape)| (name.as_str(), shape.clone()))
                    .collect();
                assert_eq!(&actual, shapes);
            }
            Err(message) => {
                let err = result.err().unwrap();
                assert_eq!(err.kind(), ConvertErrorKind::InvalidRequest);
                assert_eq!(err.to_string(), format!("invalid conversion request: {}", message));
            }
        }
    })
}

#[test]
fn test_convert_cycle() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "x", "op": "Placeholder", "shape": [2]},
                {"name": "a", "op": "Add", "inputs": ["x", "b"]},
                {"name": "b", "op": "Relu", "inputs": ["a"]},
                {"name": "y", "op": "Relu", "inputs": ["b"]}
            ]
        }
    }));

    let err = convert(&program, None, None).err().unwrap();
    assert_eq!(err.kind(), ConvertErrorKind::IllFormedGraph);
    assert_eq!(err.node_path(), ["main"]);
}

#[test]
fn test_convert_unsupported_op() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "x", "op": "Placeholder", "shape": [1, 8, 8, 8, 3]},
                {"name": "conv", "op": "Conv3D", "inputs": ["x"]}
            ]
        }
    }));

    let err = convert(&program, None, None).err().unwrap();
    assert_eq!(err.kind(), ConvertErrorKind::UnsupportedOperator);
    assert_eq!(err.node_path(), ["conv"]);
}

#[test]
fn test_custom_lowering() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "x", "op": "Placeholder", "shape": [2, 3]},
                {"name": "y", "op": "Gelu", "inputs": ["x"]}
            ]
        }
    }));

    fn lower_gelu(ctx: &mut ConversionContext, node: &SsaNode) -> Result<(), ConvertError> {
        let inputs = ctx.resolve_inputs(node)?;
        let mode = UnaryMode::Sqrt;
        ctx.emit(&node.name, Unary { mode }, &inputs, [node.name.as_str()])?;
        Ok(())
    }

    let mut registry = LoweringRegistry::with_all_ops();
    registry.register_op("Gelu", lower_gelu);

    let network = SsaConverter::new(&program, None, None, None)
        .unwrap()
        .with_registry(registry)
        .with_options(ConvertOptions {
            timing: true,
            verbose: false,
        })
        .convert()
        .unwrap();

    assert_eq!(layer_kinds(&network), ["Unary"]);
    assert_eq!(output_shape(&network, "y"), Some(vec![2, 3]));
}

#[test]
fn test_convert_split() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "x", "op": "Placeholder", "shape": [6, 4]},
                {
                    "name": "sp",
                    "op": "Split",
                    "inputs": ["x"],
                    "attrs": {"split_dim": 0, "split": [2, 2, 2]}
                },
                {"name": "second", "op": "get_tuple", "inputs": ["sp"], "attrs": {"index": 1}},
                {"name": "r", "op": "Relu", "inputs": ["second"]},
                {"name": "r2", "op": "Relu", "inputs": [{"binding": "sp", "index": 2}]}
            ]
        }
    }));

    let network = convert(&program, None, None).unwrap();

    assert_eq!(layer_kinds(&network), ["SplitNd", "Activation", "Activation"]);
    let split = network.layer("sp").unwrap();
    assert_eq!(split.outputs, ["sp_0_", "sp_1_", "sp_2_"]);
    for desc in &split.output_tensors {
        assert_eq!(desc.dims, [2, 4]);
    }
    assert_eq!(network.layer("r").unwrap().inputs, ["sp_1_"]);
    assert_eq!(network.layer("r2").unwrap().inputs, ["sp_2_"]);
    assert_eq!(output_shape(&network, "r"), Some(vec![2, 4]));
}

#[test]
fn test_convert_uneven_split() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "x", "op": "Placeholder", "shape": [6, 4]},
                {
                    "name": "sp",
                    "op": "Split",
                    "inputs": ["x"],
                    "attrs": {"split_dim": 0, "split": [2, 4]}
                }
            ]
        }
    }));

    let err = convert(&program, None, None).err().unwrap();
    assert_eq!(err.kind(), ConvertErrorKind::NotImplemented);
}

#[test]
fn test_convert_unpack_and_pack() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "x", "op": "Placeholder", "shape": [3, 2, 4]},
                {"name": "parts", "op": "Unpack", "inputs": ["x"], "attrs": {"num": 3, "axis": 0}},
                {"name": "packed", "op": "Pack", "inputs": ["parts"]}
            ]
        }
    }));

    let network = convert(&program, None, None).unwrap();

    assert_eq!(
        layer_names(&network),
        ["parts", "parts_0", "parts_1", "parts_2", "packed"]
    );
    assert_eq!(
        network.layer("parts").unwrap().outputs,
        ["parts_unsqueezed_0", "parts_unsqueezed_1", "parts_unsqueezed_2"]
    );
    assert_eq!(network.layer("parts_1").unwrap().output_tensors[0].dims, [2, 4]);
    assert_eq!(
        network.layer("packed").unwrap().inputs,
        ["parts_0", "parts_1", "parts_2"]
    );
    assert_eq!(output_shape(&network, "packed"), Some(vec![3, 2, 4]));
}

#[test]
fn test_convert_strided_slice() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "x", "op": "Placeholder", "shape": [4, 5]},
                {
                    "name": "row",
                    "op": "StridedSlice",
                    "inputs": ["x"],
                    "attrs": {
                        "slice": [[1, 2, 1], [0, 5, 1]],
                        "squeeze": [0],
                        "_output_shapes": [[5]]
                    }
                },
                {
                    "name": "block",
                    "op": "StridedSlice",
                    "inputs": ["x"],
                    "attrs": {"slice": [[0, 4, 2], [1, 3, 1]]}
                }
            ]
        }
    }));

    let network = convert(&program, None, None).unwrap();

    assert_eq!(layer_names(&network), ["row_slice_", "row", "block"]);
    assert_eq!(layer_kinds(&network), ["SliceStatic", "Squeeze", "SliceStatic"]);
    assert_eq!(output_shape(&network, "row"), Some(vec![5]));
    assert_eq!(output_shape(&network, "block"), Some(vec![2, 2]));
}

#[test]
fn test_convert_tensor_array() {
    #[derive(Debug)]
    struct Case {
        size_attr: Option<i64>,
        expected_kinds: Vec<&'static str>,
        expected_shape: Shape,
    }

    let cases = [
        Case {
            size_attr: Some(3),
            expected_kinds: vec!["LoadConstantNd"],
            expected_shape: vec![3, 4],
        },
        Case {
            size_attr: None,
            expected_kinds: vec!["LoadConstantNd", "ConcatNd", "FillDynamic"],
            expected_shape: vec![-1, 4],
        },
    ];

    cases.test_each(|case| {
        let mut attrs = json!({"element_shape": [4]});
        if let Some(size) = case.size_attr {
            attrs["size"] = json!(size);
        }
        let program = parse_program(json!({
            "functions": {
                "main": [
                    {"name": "n", "op": "Placeholder", "shape": [1]},
                    {"name": "arr", "op": "TensorArrayV3", "inputs": ["n"], "attrs": attrs}
                ]
            }
        }));

        let network = convert(&program, None, None).unwrap();

        assert_eq!(layer_kinds(&network), case.expected_kinds);
        let arr = network.producer("arr").unwrap();
        assert_eq!(arr.output_tensors[0].dims, case.expected_shape);
        assert_eq!(output_shape(&network, "arr"), Some(case.expected_shape.clone()));
    })
}

#[test]
fn test_convert_tensor_array_read_write() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "arr", "op": "Placeholder", "shape": [3, 4]},
                {"name": "value", "op": "Placeholder", "shape": [4]},
                {"name": "index", "op": "Placeholder", "shape": [1]},
                {"name": "written", "op": "TensorArrayWriteV3", "inputs": ["index", "value", "arr"]},
                {"name": "read", "op": "TensorArrayReadV3", "inputs": ["index", "written"]},
                {"name": "size", "op": "TensorArraySizeV3", "inputs": ["written"]}
            ]
        }
    }));

    let network = convert(&program, None, None).unwrap();

    assert_eq!(
        layer_names(&network),
        [
            "value_expanded",
            "written",
            "read_gather_",
            "read_squeeze_",
            "size_full_shape",
            "size"
        ]
    );
    assert_eq!(
        network.layer("written").unwrap().inputs,
        ["arr", "index", "value_expanded"]
    );
    assert_eq!(network.layer("read_gather_").unwrap().inputs, ["written", "index"]);
    assert_eq!(output_shape(&network, "read"), Some(vec![4]));
    assert_eq!(output_shape(&network, "size"), Some(vec![1]));
}

#[test]
fn test_convert_range() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "n", "op": "Placeholder", "shape": [1]},
                {"name": "start", "op": "Const", "value": {"shape": [], "data": [0.]}},
                {"name": "limit", "op": "Const", "value": {"shape": [], "data": [6.]}},
                {"name": "delta", "op": "Const", "value": {"shape": [], "data": [2.]}},
                {"name": "fixed", "op": "Range", "inputs": ["start", "limit", "delta"]},
                {"name": "dynamic", "op": "Range", "inputs": ["start", "n", "delta"]}
            ]
        }
    }));

    let network = convert(&program, None, None).unwrap();

    let fixed = network.layer("fixed").unwrap();
    assert_eq!(fixed.kind(), "RangeStatic");
    assert!(fixed.inputs.is_empty());
    assert_eq!(output_shape(&network, "fixed"), Some(vec![3]));

    let dynamic = network.layer("dynamic").unwrap();
    assert_eq!(dynamic.kind(), "RangeDynamic");
    assert_eq!(dynamic.inputs, ["n", "start", "delta"]);
}

#[test]
fn test_convert_matmul() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "x", "op": "Placeholder", "shape": [2, 3]},
                {"name": "y", "op": "Placeholder", "shape": [5, 3]},
                {
                    "name": "w",
                    "op": "Const",
                    "value": {"shape": [4, 3], "data": [0., 0., 0., 0., 0., 0., 0., 0., 0., 0., 0., 0.]}
                },
                {"name": "fc", "op": "MatMul", "inputs": ["x", "w"], "attrs": {"transpose_b": true}},
                {"name": "mm", "op": "BatchMatMul", "inputs": ["x", "y"], "attrs": {"adj_y": true}}
            ]
        }
    }));

    let network = convert(&program, None, None).unwrap();

    let fc = network.layer("fc").unwrap();
    assert_eq!(fc.inputs, ["x"]);
    assert_eq!(output_shape(&network, "fc"), Some(vec![2, 4]));

    let mm = network.layer("mm").unwrap();
    assert_eq!(mm.inputs, ["x", "y"]);
    assert_eq!(output_shape(&network, "mm"), Some(vec![2, 5]));

    // The constant weight is only used by the layer's parameters.
    assert!(network.layer("w").is_none());
}

#[test]
fn test_convert_concat() {
    #[derive(Debug)]
    struct Case {
        axis_attr: Option<i64>,
        axis_input: f32,
    }

    let cases = [
        // Axis from the trailing constant input.
        Case {
            axis_attr: None,
            axis_input: 1.,
        },
        // The attribute supplies the axis, and the trailing input is still
        // not concatenated.
        Case {
            axis_attr: Some(1),
            axis_input: 1.,
        },
        Case {
            axis_attr: Some(-1),
            axis_input: 0.,
        },
    ];

    cases.test_each(|case| {
        let axis_input = case.axis_input;
        let mut concat = json!({"name": "c", "op": "ConcatV2", "inputs": ["a", "b", "axis"]});
        if let Some(axis) = case.axis_attr {
            concat["attrs"] = json!({"axis": axis});
        }
        let program = parse_program(json!({
            "functions": {
                "main": [
                    {"name": "a", "op": "Placeholder", "shape": [2, 3]},
                    {"name": "b", "op": "Placeholder", "shape": [2, 5]},
                    {"name": "axis", "op": "Const", "value": {"shape": [], "data": [axis_input]}},
                    concat
                ]
            }
        }));

        let network = convert(&program, None, None).unwrap();

        assert_eq!(layer_names(&network), ["c"]);
        assert_eq!(network.layer("c").unwrap().inputs, ["a", "b"]);
        assert_eq!(output_shape(&network, "c"), Some(vec![2, 8]));
    })
}

#[test]
fn test_convert_conv2d() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "x", "op": "Placeholder", "shape": [1, 8, 8, 3]},
                {
                    "name": "conv",
                    "op": "Conv2D",
                    "inputs": ["x"],
                    "attrs": {
                        "W": {"shape": [1, 1, 3, 2], "data": [0., 0., 0., 0., 0., 0.]},
                        "strides": [1, 2, 2, 1],
                        "padding": "SAME",
                        "_output_shapes": [[1, 4, 4, 2]]
                    }
                }
            ]
        }
    }));

    let network = convert(&program, None, None).unwrap();
    assert_eq!(layer_kinds(&network), ["Convolution"]);
    assert_eq!(output_shape(&network, "conv"), Some(vec![1, 4, 4, 2]));

    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "x", "op": "Placeholder", "shape": [1, 8, 8, 3]},
                {"name": "w", "op": "Placeholder", "shape": [1, 1, 3, 2]},
                {"name": "conv", "op": "Conv2D", "inputs": ["x", "w"], "attrs": {"padding": "SAME"}}
            ]
        }
    }));
    let err = convert(&program, None, None).err().unwrap();
    assert_eq!(err.kind(), ConvertErrorKind::NotImplemented);
}

#[test]
fn test_convert_reverse_and_expand_dims() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "x", "op": "Placeholder", "shape": [2, 3, 4]},
                {"name": "axes", "op": "Const", "value": {"shape": [1], "data": [-1.]}},
                {"name": "rev", "op": "ReverseV2", "inputs": ["x", "axes"]},
                {"name": "dim", "op": "Const", "value": {"shape": [1], "data": [0.]}},
                {"name": "exp", "op": "ExpandDims", "inputs": ["rev", "dim"]}
            ]
        }
    }));

    let network = convert(&program, None, None).unwrap();

    assert_eq!(layer_names(&network), ["rev", "exp"]);
    assert_eq!(
        network.layer("rev").unwrap().op.params(),
        json!({"reverse_dim": [false, false, true]})
    );
    assert_eq!(output_shape(&network, "exp"), Some(vec![1, 2, 3, 4]));
}

fn loop_program(body_returns: Value) -> SsaProgram {
    parse_program(json!({
        "functions": {
            "main": [
                {"name": "i0", "op": "Const", "value": {"shape": [1], "data": [0.]}},
                {"name": "state", "op": "make_tuple", "inputs": ["i0"]},
                {
                    "name": "loop",
                    "op": "while",
                    "inputs": ["state"],
                    "attrs": {"cond_function": "cond", "body_function": "body"}
                }
            ],
            "cond": [
                {"name": "cond_entry", "op": "function_entry"},
                {"name": "i", "op": "get_tuple", "inputs": ["cond_entry"], "attrs": {"index": 0}},
                {"name": "three", "op": "Const", "value": {"shape": [1], "data": [3.]}},
                {"name": "less", "op": "Less", "inputs": ["i", "three"]},
                {"name": "cond_ret", "op": "return", "inputs": ["less"]}
            ],
            "body": [
                {"name": "body_entry", "op": "function_entry"},
                {"name": "j", "op": "get_tuple", "inputs": ["body_entry"], "attrs": {"index": 0}},
                {"name": "one", "op": "Const", "value": {"shape": [1], "data": [1.]}},
                {"name": "next", "op": "Add", "inputs": ["j", "one"]},
                {"name": "body_tuple", "op": "make_tuple", "inputs": body_returns},
                {"name": "body_ret", "op": "return", "inputs": ["body_tuple"]}
            ]
        }
    }))
}

#[test]
fn test_convert_loop() {
    let program = loop_program(json!(["next"]));

    let network = convert(&program, None, None).unwrap();

    assert_eq!(layer_kinds(&network), ["LoadConstantNd", "Loop"]);
    let looped = network
        .layer("loop")
        .and_then(|l| l.op.downcast_ref::<Loop>())
        .unwrap();
    assert!(network.layer("loop").unwrap().inputs.is_empty());
    assert_eq!(looped.condition_var, "less");
    assert_eq!(looped.max_iterations, 0);
    assert_eq!(layer_names(&looped.condition), ["three", "less"]);
    assert_eq!(layer_names(&looped.body), ["one", "next", "copy_next_i0"]);

    // The body writes its result back onto the carried edge.
    let copy = looped.body.layer("copy_next_i0").unwrap();
    assert_eq!(copy.kind(), "Copy");
    assert_eq!(copy.inputs, ["next"]);
    assert_eq!(copy.outputs, ["i0"]);
    assert_eq!(copy.output_tensors[0].dims, [1]);

    // The loop's value is the carried edge.
    let outputs: Vec<_> = network.outputs.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(outputs, ["i0"]);
}

#[test]
fn test_convert_loop_widens_carried_shape() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "i0", "op": "Const", "value": {"shape": [1], "data": [0.]}},
                {"name": "state", "op": "make_tuple", "inputs": ["i0"]},
                {
                    "name": "loop",
                    "op": "while",
                    "inputs": ["state"],
                    "attrs": {"cond_function": "cond", "body_function": "body"}
                }
            ],
            "cond": [
                {"name": "cond_entry", "op": "function_entry"},
                {"name": "i", "op": "get_tuple", "inputs": ["cond_entry"], "attrs": {"index": 0}},
                {"name": "three", "op": "Const", "value": {"shape": [1], "data": [3.]}},
                {"name": "less", "op": "Less", "inputs": ["i", "three"]},
                {"name": "cond_ret", "op": "return", "inputs": ["less"]}
            ],
            "body": [
                {"name": "body_entry", "op": "function_entry"},
                {"name": "j", "op": "get_tuple", "inputs": ["body_entry"], "attrs": {"index": 0}},
                {"name": "axis", "op": "Const", "value": {"shape": [], "data": [0.]}},
                {"name": "grown", "op": "ConcatV2", "inputs": ["j", "j", "axis"]},
                {"name": "body_tuple", "op": "make_tuple", "inputs": ["grown"]},
                {"name": "body_ret", "op": "return", "inputs": ["body_tuple"]}
            ]
        }
    }));

    let network = convert(&program, None, None).unwrap();

    // The carried value doubles in length each iteration, so only its rank
    // is known.
    assert_eq!(output_shape(&network, "i0"), Some(vec![-1]));

    // Layers which read the carried value before the body's copy see the
    // widened shape too.
    let looped = network
        .layer("loop")
        .and_then(|l| l.op.downcast_ref::<Loop>())
        .unwrap();
    let less = looped.condition.layer("less").unwrap();
    assert_eq!(less.input_tensors[0].dims, [-1]);
    let grown = looped.body.layer("grown").unwrap();
    assert_eq!(grown.input_tensors[0].dims, [-1]);
    assert_eq!(grown.output_tensors[0].dims, [-1]);
    assert_eq!(layer_names(&looped.body), ["grown", "copy_grown_i0"]);
}

#[test]
fn test_convert_loop_mismatch() {
    let program = loop_program(json!(["next", "one"]));
    let err = convert(&program, None, None).err().unwrap();
    assert_eq!(err.kind(), ConvertErrorKind::ControlFlowMismatch);
    assert_eq!(err.node_path()[0], "loop");
}

#[test]
fn test_convert_malformed_loop() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "i0", "op": "Const", "value": {"shape": [1], "data": [0.]}},
                {"name": "state", "op": "make_tuple", "inputs": ["i0"]},
                {"name": "loop", "op": "while", "inputs": ["state"], "attrs": {"body_function": "body"}}
            ],
            "body": [
                {"name": "body_entry", "op": "function_entry"}
            ]
        }
    }));

    let err = convert(&program, None, None).err().unwrap();
    assert_eq!(err.kind(), ConvertErrorKind::ControlFlowMismatch);
    assert_eq!(err.node_path(), ["loop"]);
}

#[test]
fn test_convert_loop_body_error() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "i0", "op": "Const", "value": {"shape": [1], "data": [0.]}},
                {"name": "state", "op": "make_tuple", "inputs": ["i0"]},
                {
                    "name": "loop",
                    "op": "while",
                    "inputs": ["state"],
                    "attrs": {"cond_function": "cond", "body_function": "body"}
                }
            ],
            "cond": [
                {"name": "cond_entry", "op": "function_entry"},
                {"name": "i", "op": "get_tuple", "inputs": ["cond_entry"], "attrs": {"index": 0}},
                {"name": "cond_ret", "op": "return", "inputs": ["i"]}
            ],
            "body": [
                {"name": "body_entry", "op": "function_entry"},
                {"name": "j", "op": "get_tuple", "inputs": ["body_entry"], "attrs": {"index": 0}},
                {"name": "bad", "op": "Erf", "inputs": ["j"]}
            ]
        }
    }));

    let err = convert(&program, None, None).err().unwrap();
    assert_eq!(err.kind(), ConvertErrorKind::UnsupportedOperator);
    assert_eq!(err.node_path(), ["loop", "bad"]);
}

#[test]
fn test_convert_branch() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "p", "op": "Placeholder", "shape": [1]},
                {"name": "x", "op": "Placeholder", "shape": [2]},
                {"name": "args", "op": "make_tuple", "inputs": ["x"]},
                {
                    "name": "br",
                    "op": "cond",
                    "inputs": ["p", "args"],
                    "attrs": {"true_function": "then", "false_function": "else"}
                },
                {"name": "out", "op": "get_tuple", "inputs": ["br"], "attrs": {"index": 0}},
                {"name": "y", "op": "Relu", "inputs": ["out"]}
            ],
            "then": [
                {"name": "then_entry", "op": "function_entry"},
                {"name": "a", "op": "get_tuple", "inputs": ["then_entry"], "attrs": {"index": 0}},
                {"name": "ta", "op": "Relu", "inputs": ["a"]},
                {"name": "then_ret", "op": "return", "inputs": ["ta"]}
            ],
            "else": [
                {"name": "else_entry", "op": "function_entry"},
                {"name": "b", "op": "get_tuple", "inputs": ["else_entry"], "attrs": {"index": 0}},
                {"name": "eb", "op": "Sigmoid", "inputs": ["b"]},
                {"name": "else_ret", "op": "return", "inputs": ["eb"]}
            ]
        }
    }));

    let network = convert(&program, None, None).unwrap();

    assert_eq!(layer_kinds(&network), ["Branch", "Activation"]);
    let branch_layer = network.layer("br").unwrap();
    assert_eq!(branch_layer.inputs, ["p"]);
    assert!(branch_layer.outputs.is_empty());

    let branch = branch_layer.op.downcast_ref::<Branch>().unwrap();
    assert_eq!(layer_names(&branch.if_branch), ["ta", "copy_ta_br_out_0"]);
    assert_eq!(layer_names(&branch.else_branch), ["eb", "copy_eb_br_out_0"]);

    assert_eq!(network.layer("y").unwrap().inputs, ["br_out_0"]);
    assert_eq!(output_shape(&network, "y"), Some(vec![2]));
}

#[test]
fn test_convert_tuple_outputs() {
    #[derive(Debug)]
    struct Case {
        nodes: Value,
        expected: Vec<(&'static str, Shape)>,
    }

    let cases = [
        Case {
            nodes: json!([{
                "name": "sp",
                "op": "Split",
                "inputs": ["x"],
                "attrs": {"split_dim": 0, "split": [2, 2, 2]}
            }]),
            expected: vec![
                ("sp_0_", vec![2, 4]),
                ("sp_1_", vec![2, 4]),
                ("sp_2_", vec![2, 4]),
            ],
        },
        // Repeated tuple elements become one output.
        Case {
            nodes: json!([
                {"name": "r", "op": "Relu", "inputs": ["x"]},
                {"name": "pair", "op": "make_tuple", "inputs": ["r", "x", "r"]}
            ]),
            expected: vec![("r", vec![6, 4]), ("x", vec![6, 4])],
        },
    ];

    cases.test_each(|case| {
        let mut main = vec![json!({"name": "x", "op": "Placeholder", "shape": [6, 4]})];
        main.extend(case.nodes.as_array().cloned().unwrap_or_default());
        let program = parse_program(json!({"functions": {"main": main}}));

        let network = convert(&program, None, None).unwrap();

        let outputs: Vec<_> = network
            .outputs
            .iter()
            .map(|o| (o.name.as_str(), o.shape.clone().unwrap_or_default()))
            .collect();
        let expected: Vec<_> = case
            .expected
            .iter()
            .map(|(name, shape)| (*name, shape.clone()))
            .collect();
        assert_eq!(outputs, expected);
    })
}

#[test]
fn test_convert_unwritten_output() {
    let program = parse_program(json!({
        "functions": {
            "main": [
                {"name": "x", "op": "Placeholder", "shape": [2]},
                {"name": "ret", "op": "return", "inputs": ["x"]}
            ]
        }
    }));

    let err = convert(&program, None, None).err().unwrap();
    assert_eq!(err.kind(), ConvertErrorKind::UnresolvedInput);
    assert_eq!(err.node_path(), ["ret"]);
}
